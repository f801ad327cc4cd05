pub mod catalog;
pub mod gateway;
pub mod orders;
pub mod payments;
pub mod reservation;
