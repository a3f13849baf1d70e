pub mod data;
pub mod key;
pub mod properties;
pub mod result;
pub mod status;

pub use data::{CacheValidators, RetrievalData};
pub use key::RetrievalKey;
pub use properties::RetrievalProperties;
pub use result::RetrievalResult;
pub use status::RetrievalStatus;
