//! The order state machine.
//!
//! | From       | To         | Allowed roles                |
//! |------------|------------|------------------------------|
//! | pending    | paid       | system                       |
//! | paid       | processing | seller, admin                |
//! | paid       | cancelled  | buyer, seller, admin, system |
//! | processing | delivered  | seller, admin                |
//! | processing | cancelled  | seller, admin                |
//! | delivered  | completed  | buyer, admin                 |
//!
//! Leaving `cancelled` is only possible through an admin revert. Failed and expired payments cancel a `pending`
//! order through the engine-internal void path, which is not part of this table.
use crate::{
    db_types::{OrderStatus, Role},
    engine_api::errors::OrderFlowError,
};

pub fn allowed_roles(from: OrderStatus, to: OrderStatus) -> &'static [Role] {
    use OrderStatus::*;
    match (from, to) {
        (Pending, Paid) => &[Role::System],
        (Paid, Processing) => &[Role::Seller, Role::Admin],
        (Paid, Cancelled) => &[Role::Buyer, Role::Seller, Role::Admin, Role::System],
        (Processing, Delivered) => &[Role::Seller, Role::Admin],
        (Processing, Cancelled) => &[Role::Seller, Role::Admin],
        (Delivered, Completed) => &[Role::Buyer, Role::Admin],
        _ => &[],
    }
}

pub fn check_transition(from: OrderStatus, to: OrderStatus, role: Role) -> Result<(), OrderFlowError> {
    if allowed_roles(from, to).contains(&role) {
        Ok(())
    } else {
        Err(OrderFlowError::InvalidTransition { from, to, role })
    }
}
