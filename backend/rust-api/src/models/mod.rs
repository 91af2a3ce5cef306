pub mod game;
pub mod prediction;
pub mod progress;
pub mod question;
pub mod result;
pub mod session;
