//! Product catalog domain: the imported product record, input validation,
//! and the filter/pagination model used by list queries.

pub mod filter;
pub mod product;

pub use filter::{Page, PageRequest, ProductFilter};
pub use product::{normalize_sku, parse_price, Product, ProductDraft, ProductPatch};
