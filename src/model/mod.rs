pub mod audit;
pub mod candidate;
pub mod clan;
pub mod mongodb;
pub mod rules;
pub mod session;
pub mod settings;
pub mod vote;
pub mod voter;
