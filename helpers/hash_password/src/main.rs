use std::env;
use std::io::stdin;
use std::process::ExitCode;

use scrypt::{
    password_hash::{PasswordHash, PasswordVerifier, PasswordHasher, SaltString, rand_core::OsRng},
    Scrypt,
};

// Prints a users file entry for the auth service.
// Usage: hash_password <username> [--admin]
// Use release build for performance, debug build is VERY slow
fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let Some(username) = args.next() else {
        eprintln!("Usage: hash_password <username> [--admin]");
        return ExitCode::FAILURE;
    };
    let admin = args.any(|arg| arg == "--admin");

    let mut password = String::new();
    eprintln!("Enter password for {} (no whitespace!):", username);
    if let Err(err) = stdin().read_line(&mut password) {
        eprintln!("Failed to read password: {}", err);
        return ExitCode::FAILURE;
    }
    let password = password.trim();

    if password.is_empty() {
        eprintln!("Password cannot be empty.");
        return ExitCode::FAILURE;
    }

    let salt = SaltString::generate(OsRng);
    let password_hash = match Scrypt.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => hash.to_string(),
        Err(err) => {
            eprintln!("Failed to hash password: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let verified = PasswordHash::new(&password_hash)
        .map(|parsed| Scrypt.verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false);
    eprintln!("Verification result: {}", verified);

    println!("{}", serde_json::json!({
        "username": username,
        "password_hash": password_hash,
        "admin": admin,
    }));
    ExitCode::SUCCESS
}
