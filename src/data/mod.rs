//! Record store contract and its backends.

pub mod store {
    pub use crate::store::*;
}

pub mod memory_store {
    pub use crate::memory_store::*;
}

pub mod pg_store {
    pub use crate::pg_store::*;
}

pub mod db {
    pub use crate::db::*;
}
