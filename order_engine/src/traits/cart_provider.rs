use crate::{
    db_types::{CartLine, ProductId, UserId},
    traits::StoreError,
};

#[allow(async_fn_in_trait)]
pub trait CartProvider {
    /// The buyer's cart lines, in the order they were added.
    async fn fetch_cart(&self, buyer: &UserId) -> Result<Vec<CartLine>, StoreError>;

    /// Sets the quantity of a product in the buyer's cart. A quantity of zero removes the line.
    async fn set_cart_quantity(&self, buyer: &UserId, product: &ProductId, quantity: i64) -> Result<(), StoreError>;
}
