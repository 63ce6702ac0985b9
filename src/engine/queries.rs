use std::collections::BTreeMap;

use tracing::debug;

use super::*;
use crate::model::*;
use crate::store::{BookingQuery, Order, Scope, Window};

/// Parse a caller-supplied state filter, case-insensitively.
pub fn parse_state(state: &str) -> Result<BookingState, BookingError> {
    Ok(state.parse::<BookingState>()?)
}

impl<D: Directory, S: BookingStore> BookingService<D, S> {
    /// Bookings made by `booker_id`, newest start first.
    pub async fn list_by_booker(
        &self,
        booker_id: UserId,
        state: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        observe("list_by_booker", self.booker_bookings(booker_id, state, None)).await
    }

    pub async fn list_by_booker_page(
        &self,
        booker_id: UserId,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Booking>, BookingError> {
        observe(
            "list_by_booker",
            self.booker_bookings(booker_id, state, Some((from, size))),
        )
        .await
    }

    /// Bookings on any item owned by `owner_id`, newest start first.
    pub async fn list_by_owner(
        &self,
        owner_id: UserId,
        state: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        observe("list_by_owner", self.owner_bookings(owner_id, state, None)).await
    }

    pub async fn list_by_owner_page(
        &self,
        owner_id: UserId,
        state: &str,
        from: i64,
        size: i64,
    ) -> Result<Vec<Booking>, BookingError> {
        observe(
            "list_by_owner",
            self.owner_bookings(owner_id, state, Some((from, size))),
        )
        .await
    }

    async fn booker_bookings(
        &self,
        booker_id: UserId,
        state: &str,
        page: Option<(i64, i64)>,
    ) -> Result<Vec<Booking>, BookingError> {
        self.require_user(booker_id).await?;
        let state = parse_state(state)?;
        let page = page.map(|(from, size)| Page::new(from, size)).transpose()?;

        let query = BookingQuery::for_state(Scope::Booker(booker_id), state, self.now());
        let bookings = self.store.query_bookings(&query, Order::StartDesc).await?;
        Ok(paginate(bookings, page))
    }

    async fn owner_bookings(
        &self,
        owner_id: UserId,
        state: &str,
        page: Option<(i64, i64)>,
    ) -> Result<Vec<Booking>, BookingError> {
        self.require_user(owner_id).await?;
        let state = parse_state(state)?;
        let page = page.map(|(from, size)| Page::new(from, size)).transpose()?;

        let item_ids = self.directory.find_owned_item_ids(owner_id).await?;
        if item_ids.is_empty() {
            debug!("owner {owner_id} has no items");
            return Ok(Vec::new());
        }
        let query = BookingQuery::for_state(Scope::Items(item_ids), state, self.now());
        let bookings = self.store.query_bookings(&query, Order::StartDesc).await?;
        Ok(paginate(bookings, page))
    }

    /// Last finished and next upcoming APPROVED booking of an item. Only the
    /// owner sees them; anyone else gets an empty summary.
    pub async fn item_bookings(
        &self,
        item_id: ItemId,
        viewer_id: UserId,
    ) -> Result<ItemBookings, BookingError> {
        observe("item_bookings", self.item_summary(item_id, viewer_id)).await
    }

    async fn item_summary(
        &self,
        item_id: ItemId,
        viewer_id: UserId,
    ) -> Result<ItemBookings, BookingError> {
        let item = self
            .directory
            .get_item(item_id)
            .await?
            .ok_or(BookingError::ItemNotFound(item_id))?;
        if item.owner_id != viewer_id {
            return Ok(ItemBookings::default());
        }
        self.summarize(item_id, self.now()).await
    }

    /// [`item_bookings`](Self::item_bookings) for every item of an owner.
    pub async fn owner_item_bookings(
        &self,
        owner_id: UserId,
    ) -> Result<BTreeMap<ItemId, ItemBookings>, BookingError> {
        observe("owner_item_bookings", self.owner_summaries(owner_id)).await
    }

    async fn owner_summaries(
        &self,
        owner_id: UserId,
    ) -> Result<BTreeMap<ItemId, ItemBookings>, BookingError> {
        self.require_user(owner_id).await?;
        let now = self.now();
        let mut out = BTreeMap::new();
        for item_id in self.directory.find_owned_item_ids(owner_id).await? {
            out.insert(item_id, self.summarize(item_id, now).await?);
        }
        Ok(out)
    }

    /// Succeeds if `user_id` has an APPROVED booking of `item_id` that has
    /// already ended.
    pub async fn ensure_can_review(
        &self,
        user_id: UserId,
        item_id: ItemId,
    ) -> Result<(), BookingError> {
        observe("ensure_can_review", self.review_check(user_id, item_id)).await
    }

    async fn review_check(
        &self,
        user_id: UserId,
        item_id: ItemId,
    ) -> Result<(), BookingError> {
        self.require_user(user_id).await?;
        if self.directory.get_item(item_id).await?.is_none() {
            return Err(BookingError::ItemNotFound(item_id));
        }
        let query = BookingQuery::new(Scope::BookerOnItem(user_id, item_id))
            .status(BookingStatus::Approved)
            .window(Window::Past(self.now()))
            .limit(1);
        if self
            .store
            .query_bookings(&query, Order::EndDesc)
            .await?
            .is_empty()
        {
            return Err(BookingError::NoCompletedBooking {
                user: user_id,
                item: item_id,
            });
        }
        Ok(())
    }

    async fn require_user(&self, id: UserId) -> Result<(), BookingError> {
        if self.directory.user_exists(id).await? {
            Ok(())
        } else {
            Err(BookingError::UserNotFound(id))
        }
    }

    async fn summarize(&self, item_id: ItemId, now: Ms) -> Result<ItemBookings, BookingError> {
        let approved =
            BookingQuery::new(Scope::Items(vec![item_id])).status(BookingStatus::Approved);
        let last = self
            .store
            .query_bookings(&approved.clone().window(Window::Past(now)).limit(1), Order::EndDesc)
            .await?
            .pop();
        let next = self
            .store
            .query_bookings(&approved.window(Window::Future(now)).limit(1), Order::StartAsc)
            .await?
            .pop();
        Ok(ItemBookings { last, next })
    }
}

fn paginate(bookings: Vec<Booking>, page: Option<Page>) -> Vec<Booking> {
    match page {
        Some(page) => page.apply(bookings),
        None => bookings,
    }
}
