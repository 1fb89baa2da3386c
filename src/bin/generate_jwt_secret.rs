use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

fn main() {
    // 256-bit key from the OS-seeded thread RNG
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let encoded = STANDARD.encode(key);

    println!("Generated JWT secret. Add this line to your .env file:");
    println!();
    println!("JWT_SECRET={}", encoded);
}
