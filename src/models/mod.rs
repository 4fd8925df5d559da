mod attachment;
mod page;
mod report;

pub use attachment::{FileRecord, PostRecord};
pub use page::{PageMeta, PageRecord, PageSnapshot, StoredPage};
pub use report::{RunReport, SiteReport};
