//! Start-up Seeding

pub mod admin_seeder;

pub use admin_seeder::{AdminSeeder, BootstrapAdmin};
