pub mod address;
pub mod cart;
pub mod order;
pub mod order_item;
pub mod product;

pub use address::Entity as Address;
pub use cart::Entity as Cart;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
