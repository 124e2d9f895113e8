pub mod admin;
pub mod economy;
pub mod health;
pub mod quests;
