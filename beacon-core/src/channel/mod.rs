// Module: channel

mod interest;
mod queue;
mod registration;

pub use interest::InterestChannel;
pub use registration::RegistrationChannel;
