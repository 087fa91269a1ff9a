pub mod lookup;
pub mod run;
pub mod validate;

pub use lookup::LookupArgs;
pub use run::RunArgs;
pub use validate::ValidateArgs;
