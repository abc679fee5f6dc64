//! Account commands against the external auth service: `signup`, `login`,
//! `logout` and `whoami`.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Password};

use flowboard::board::auth::{AuthClient, SignUpOutcome, UserRecord};
use flowboard::config::BoardConfig;

fn auth_client(config: &BoardConfig) -> Result<AuthClient> {
    Ok(AuthClient::new(
        config.require_auth_url()?,
        &config.public_key,
    ))
}

fn prompt_email(email: Option<String>) -> Result<String> {
    match email {
        Some(email) => Ok(email),
        None => Input::<String>::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email"),
    }
}

fn prompt_password(password: Option<String>, confirm: bool) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    let mut prompt = Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "Passwords do not match");
    }
    prompt.interact().context("Failed to read password")
}

fn print_token(token: &str) {
    println!();
    println!("Access token (export it for the board commands):");
    println!("  export FLOWBOARD_TOKEN={}", token);
}

fn describe(user: &UserRecord) -> String {
    let name = user
        .user_metadata
        .display_name
        .as_deref()
        .unwrap_or("(no display name)");
    match &user.email {
        Some(email) => format!("{} <{}>", name, email),
        None => name.to_string(),
    }
}

pub async fn cmd_signup(
    config: &BoardConfig,
    email: Option<String>,
    display_name: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let auth = auth_client(config)?;
    let email = prompt_email(email)?;
    let display_name = match display_name {
        Some(name) => name,
        None => Input::<String>::new()
            .with_prompt("Display name")
            .interact_text()
            .context("Failed to read display name")?,
    };
    let password = prompt_password(password, true)?;

    match auth.sign_up(&email, &password, &display_name).await? {
        SignUpOutcome::Session(session) => {
            println!(
                "{} Signed up as {}",
                style("✓").green(),
                style(describe(&session.user)).bold()
            );
            print_token(&session.access_token);
        }
        SignUpOutcome::PendingConfirmation(user) => {
            println!(
                "{} Account created for {}. Check your email to confirm it, then run `flowboard login`.",
                style("✓").green(),
                describe(&user)
            );
        }
    }
    Ok(())
}

pub async fn cmd_login(
    config: &BoardConfig,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let auth = auth_client(config)?;
    let email = prompt_email(email)?;
    let password = prompt_password(password, false)?;

    let session = auth.sign_in(&email, &password).await?;
    println!(
        "{} Signed in as {}",
        style("✓").green(),
        style(describe(&session.user)).bold()
    );
    print_token(&session.access_token);
    Ok(())
}

pub async fn cmd_logout(config: &BoardConfig) -> Result<()> {
    let auth = auth_client(config)?;
    auth.sign_out(config.require_token()?).await?;
    println!("{} Signed out", style("✓").green());
    Ok(())
}

pub async fn cmd_whoami(config: &BoardConfig) -> Result<()> {
    let auth = auth_client(config)?;
    let user = auth.current_user(config.require_token()?).await?;
    println!("{}", describe(&user));
    println!("{} {}", style("id:").dim(), user.id);
    Ok(())
}
