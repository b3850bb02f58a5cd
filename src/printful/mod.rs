pub mod catalog;
pub mod config;
pub mod mockups;
pub mod orders;

pub use catalog::{CatalogProduct, CatalogVariant, fetch_catalog, fetch_product_detail};
pub use mockups::{
    MockupTask, MockupTaskRequest, MockupTaskStatus, PrintfileDescriptor, create_mockup_task,
    fetch_mockup_task, fetch_printfiles,
};
pub use orders::{OrderRecipient, OrderRequest, SubmittedOrder, create_order};
