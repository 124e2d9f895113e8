pub mod economy;
pub mod ledger;
pub mod quest;
pub mod wallet;

pub use ledger::*;
pub use quest::*;
pub use wallet::*;
