mod commission;
mod instructor;
mod order;
mod payout;
mod user;

pub use commission::*;
pub use instructor::*;
pub use order::*;
pub use payout::*;
pub use user::*;
