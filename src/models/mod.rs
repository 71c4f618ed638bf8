pub mod crm;
pub mod inventory;
pub mod product;
pub mod purchasing;
pub mod sales;
pub mod user;

// Re-export only the types we actually use
pub use crm::{Activity, CrmContact, EmailInboxRow, GmailConnection, Inquiry, Reminder};
pub use inventory::{Batch, StockRow};
pub use product::Product;
pub use purchasing::{Grn, GrnItem, PurchaseOrder, PurchaseOrderItem, Supplier};
pub use sales::{
    Customer, DeliveryChallan, DeliveryChallanItem, Payment, SalesInvoice, SalesInvoiceItem,
};
pub use user::{User, UserResponse};
