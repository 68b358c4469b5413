//! Master data: reference catalogs and get-or-create resolution

pub mod catalog;
pub mod resolver;

pub use resolver::MasterDataResolver;
