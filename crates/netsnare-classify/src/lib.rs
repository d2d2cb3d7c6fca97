//! netsnare-classify — the classification adapter.
//!
//! Listeners emit free-form internal labels; the backend expects a closed
//! taxonomy with category and score. [`classify`] performs that mapping as
//! a pure, table-driven function: same input, same canonical kind, category,
//! and base score, every time. Unknown labels fall back to `honeypot`.

pub mod classifier;
pub mod taxonomy;

pub use classifier::{classify, AttackRecord, EnhancementMetadata};
pub use taxonomy::{AttackCategory, AttackType};
