//! Creates the demo account in the configured Postgres database.
//!
//! The password comes from `SEED_PASSWORD`, or is prompted for interactively.
use bcrypt::{hash, DEFAULT_COST};
use chat_relay::db;
use chat_relay::models::auth::NewUser;
use chat_relay::store::{PgStore, StoreError, UserStore};
use std::io::{self, Write};

const DEFAULT_EMAIL: &str = "demo@ai.com";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let store = PgStore::new(db::create_pool(&database_url, 1).await?);

    let email = std::env::var("SEED_EMAIL").unwrap_or_else(|_| DEFAULT_EMAIL.to_string());
    let password = match std::env::var("SEED_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            print!("Password for {}: ", email);
            io::stdout().flush()?;
            rpassword::read_password()?
        }
    };

    if password.len() < 6 {
        eprintln!("Password must be at least 6 characters long");
        std::process::exit(1);
    }

    let created = store
        .create_user(NewUser {
            email: email.clone(),
            name: Some("Demo User".to_string()),
            password_hash: hash(&password, DEFAULT_COST)?,
        })
        .await;

    match created {
        Ok(user) => println!("Created demo user {} ({})", user.email, user.id),
        Err(StoreError::Conflict(_)) => println!("User {} already exists, nothing to do", email),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
