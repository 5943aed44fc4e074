pub mod coinbase;
pub mod ib;
