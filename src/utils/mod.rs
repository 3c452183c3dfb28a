pub mod clock;
pub mod helpers;
