mod cart;
mod coupon;
mod order;
mod payment_intent;
mod product;

pub use cart::*;
pub use coupon::*;
pub use order::*;
pub use payment_intent::*;
pub use product::*;
