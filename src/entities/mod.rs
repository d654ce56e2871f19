pub mod customer_address;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod product_variant;

pub use order::{OrderStatus, PaymentMethod};
pub use payment::PaymentStatus;
