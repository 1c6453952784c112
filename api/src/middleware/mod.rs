pub mod cors;
pub mod routing;
pub mod unit_of_work;
