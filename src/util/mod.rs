//! Supporting utilities: the intrusive waiter list.

pub mod list;
