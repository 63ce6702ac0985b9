use std::fmt;

use serde::Serialize;

use crate::model::*;
use crate::store::StoreError;

/// Coarse failure class a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidRequest,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }

    /// Metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug)]
pub enum BookingError {
    UserNotFound(UserId),
    ItemNotFound(ItemId),
    BookingNotFound(BookingId),
    AccessDenied { booking: BookingId, user: UserId },
    NotOwner { item: ItemId, user: UserId },
    ItemUnavailable(ItemId),
    Overlap { item: ItemId, span: Span },
    AlreadyDecided { booking: BookingId, status: BookingStatus },
    UnknownState(String),
    InvalidPage(PageError),
    NoCompletedBooking { user: UserId, item: ItemId },
    SelfBooking { item: ItemId, user: UserId },
    Store(StoreError),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::UserNotFound(_)
            | BookingError::ItemNotFound(_)
            | BookingError::BookingNotFound(_) => ErrorKind::NotFound,
            BookingError::AccessDenied { .. } | BookingError::NotOwner { .. } => {
                ErrorKind::Forbidden
            }
            BookingError::ItemUnavailable(_)
            | BookingError::Overlap { .. }
            | BookingError::AlreadyDecided { .. }
            | BookingError::UnknownState(_)
            | BookingError::InvalidPage(_)
            | BookingError::NoCompletedBooking { .. } => ErrorKind::InvalidRequest,
            BookingError::SelfBooking { .. } => ErrorKind::Conflict,
            BookingError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingError::UserNotFound(id) => write!(f, "user {id} not found"),
            BookingError::ItemNotFound(id) => write!(f, "item {id} not found"),
            BookingError::BookingNotFound(id) => write!(f, "booking {id} not found"),
            BookingError::AccessDenied { booking, user } => {
                write!(f, "user {user} may not view booking {booking}")
            }
            BookingError::NotOwner { item, user } => {
                write!(f, "user {user} does not own item {item}")
            }
            BookingError::ItemUnavailable(id) => write!(f, "item {id} is not available"),
            BookingError::Overlap { item, span } => write!(
                f,
                "item {item} already booked within [{}, {}]",
                span.start, span.end
            ),
            BookingError::AlreadyDecided { booking, status } => {
                write!(f, "booking {booking} already {status}")
            }
            BookingError::UnknownState(s) => write!(f, "Unknown state: {s}"),
            BookingError::InvalidPage(e) => write!(f, "invalid page: {e}"),
            BookingError::NoCompletedBooking { user, item } => {
                write!(f, "user {user} has no finished booking of item {item}")
            }
            BookingError::SelfBooking { item, user } => {
                write!(f, "user {user} owns item {item} and cannot book it")
            }
            BookingError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            BookingError::InvalidPage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}

impl From<UnknownState> for BookingError {
    fn from(e: UnknownState) -> Self {
        BookingError::UnknownState(e.0)
    }
}

impl From<PageError> for BookingError {
    fn from(e: PageError) -> Self {
        BookingError::InvalidPage(e)
    }
}

/// Transport-neutral error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

impl From<&BookingError> for ErrorResponse {
    fn from(e: &BookingError) -> Self {
        Self {
            error: e.to_string(),
            kind: e.kind(),
        }
    }
}
