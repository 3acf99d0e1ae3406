pub mod cancel;
pub mod gate;
pub mod ledger;
pub mod resume;
pub mod status;
pub mod sync;
pub mod translate;
pub mod validate;
