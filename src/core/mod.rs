// Domain-layer modules and shared errors/models
pub mod intake {
    pub use crate::intake::*;
}

pub mod ledger {
    pub use crate::ledger::*;
}

pub mod loans {
    pub use crate::loans::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod portfolio {
    pub use crate::portfolio::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod errors {
    pub use crate::errors::*;
}
