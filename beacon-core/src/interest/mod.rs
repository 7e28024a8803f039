// Module: interest

mod index;
mod router;

pub use router::{InterestSubscription, NotificationRouter};
