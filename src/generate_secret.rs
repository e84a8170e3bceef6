// generate_secret.rs
// Utility to generate a new session signing secret

use rand::distributions::{Alphanumeric, DistString};

const SECRET_LENGTH: usize = 64;

fn main() {
    println!("Generating new session secret...\n");

    let secret = Alphanumeric.sample_string(&mut rand::thread_rng(), SECRET_LENGTH);

    println!("✅ Secret generated successfully!\n");
    println!("Add this to your .env file:");
    println!("─────────────────────────────────────────────────");
    println!("SESSION_SECRET={}", secret);
    println!("─────────────────────────────────────────────────");
    println!("\n⚠️  IMPORTANT:");
    println!("  • Keep this secret out of version control");
    println!("  • Rotating it signs every existing session out");
}
