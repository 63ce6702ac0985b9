use tracing::{debug, info};

use super::*;
use crate::model::*;

impl<D: Directory, S: BookingStore> BookingService<D, S> {
    /// Request `item_id` for `span` on behalf of `booker_id`. The new booking
    /// starts out WAITING.
    pub async fn create_booking(
        &self,
        item_id: ItemId,
        span: Span,
        booker_id: UserId,
    ) -> Result<Booking, BookingError> {
        observe("create_booking", self.create_booking_inner(item_id, span, booker_id)).await
    }

    async fn create_booking_inner(
        &self,
        item_id: ItemId,
        span: Span,
        booker_id: UserId,
    ) -> Result<Booking, BookingError> {
        if !self.directory.user_exists(booker_id).await? {
            return Err(BookingError::UserNotFound(booker_id));
        }
        if self.directory.get_item(item_id).await?.is_none() {
            return Err(BookingError::ItemNotFound(item_id));
        }

        let lock = self.store.lock_item(item_id).await?;
        // Re-read under the lock; availability may have changed.
        let item = self
            .directory
            .get_item(item_id)
            .await?
            .ok_or(BookingError::ItemNotFound(item_id))?;
        if !item.available {
            return Err(BookingError::ItemUnavailable(item_id));
        }
        if item.owner_id == booker_id {
            return Err(BookingError::SelfBooking {
                item: item_id,
                user: booker_id,
            });
        }
        if self.store.exists_overlapping_approved(&lock, span).await? {
            debug!("booking of item {item_id} rejected: overlaps an approved booking");
            return Err(BookingError::Overlap {
                item: item_id,
                span,
            });
        }

        let booking = self
            .store
            .insert_booking(
                &lock,
                NewBooking {
                    item_id,
                    booker_id,
                    span,
                },
            )
            .await?;
        info!(
            "booking {} created: item {item_id}, booker {booker_id}, [{}, {}]",
            booking.id, span.start, span.end
        );
        Ok(booking)
    }

    /// Owner decision on a WAITING booking.
    pub async fn set_approval(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        approve: bool,
    ) -> Result<Booking, BookingError> {
        observe("set_approval", self.set_approval_inner(booking_id, user_id, approve)).await
    }

    async fn set_approval_inner(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        approve: bool,
    ) -> Result<Booking, BookingError> {
        let seen = self
            .store
            .find_booking_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;

        let lock = self.store.lock_item(seen.item_id).await?;
        let booking = self
            .store
            .find_booking_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        let item = self
            .directory
            .get_item(booking.item_id)
            .await?
            .ok_or(BookingError::ItemNotFound(booking.item_id))?;

        if item.owner_id != user_id {
            return Err(BookingError::NotOwner {
                item: item.id,
                user: user_id,
            });
        }
        if booking.status.is_terminal() {
            return Err(BookingError::AlreadyDecided {
                booking: booking_id,
                status: booking.status,
            });
        }

        let status = if approve {
            // Another request for the same window may have been approved
            // since this one was created.
            if self
                .store
                .exists_overlapping_approved(&lock, booking.span)
                .await?
            {
                return Err(BookingError::Overlap {
                    item: item.id,
                    span: booking.span,
                });
            }
            BookingStatus::Approved
        } else {
            BookingStatus::Rejected
        };

        let updated = self
            .store
            .update_booking_status(&lock, booking_id, status)
            .await?;
        info!("booking {booking_id} {status} by owner {user_id}");
        Ok(updated)
    }

    /// Fetch a booking as seen by `user_id`, who must be its booker or the
    /// item's owner.
    pub async fn get_booking(
        &self,
        booking_id: BookingId,
        user_id: UserId,
    ) -> Result<Booking, BookingError> {
        observe("get_booking", self.get_booking_inner(booking_id, user_id)).await
    }

    async fn get_booking_inner(
        &self,
        booking_id: BookingId,
        user_id: UserId,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .store
            .find_booking_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.booker_id == user_id {
            return Ok(booking);
        }
        let owner = self
            .directory
            .get_item(booking.item_id)
            .await?
            .map(|item| item.owner_id);
        if owner == Some(user_id) {
            Ok(booking)
        } else {
            Err(BookingError::AccessDenied {
                booking: booking_id,
                user: user_id,
            })
        }
    }
}
