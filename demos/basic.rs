//! Basic example using the in-memory provider

use std::sync::Arc;

use salvo::prelude::*;
use salvo_session_manager::{Manager, SessionConfig, SessionDepotExt, SessionHandler};

#[handler]
async fn index(depot: &mut Depot) -> String {
    let session = depot.session().expect("Session not found");

    // Get current view count
    let views: i32 = session.get("views").await.unwrap_or(0);

    // Increment view count
    if let Err(e) = session.set("views", views + 1).await {
        return format!("Could not update session: {}", e);
    }

    format!(
        "Hello! You have viewed this page {} time(s).\nSession ID: {}",
        views + 1,
        session.id()
    )
}

#[handler]
async fn get_user(depot: &mut Depot) -> String {
    let session = depot.session().expect("Session not found");

    match session.get::<String>("user").await {
        Some(user) => format!("Logged in as: {}", user),
        None => "Not logged in".to_string(),
    }
}

#[handler]
async fn login(req: &mut Request, depot: &mut Depot) -> String {
    let session = depot.session().expect("Session not found");
    if session.contains("user").await {
        return "Already logged in".to_string();
    }

    let username = req.query::<String>("name").unwrap_or_else(|| "anonymous".to_string());
    if let Err(e) = session.set("user", &username).await {
        return format!("Could not update session: {}", e);
    }

    // New ID after a privilege change
    session.regenerate();

    format!("User set to: {}", username)
}

#[handler]
async fn clear(depot: &mut Depot) -> &'static str {
    let session = depot.session().expect("Session not found");

    match session.flush().await {
        Ok(()) => "Session cleared",
        Err(_) => "Could not clear session",
    }
}

#[handler]
async fn logout(depot: &mut Depot) -> &'static str {
    depot.session().expect("Session not found").destroy();
    "Logged out"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = SessionConfig::new("sid")
        .with_gc_lifetime(60)
        .with_max_lifetime(1800)
        .with_cookie_lifetime(1800);

    let manager = match Manager::new("memory", config).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            eprintln!("Failed to create session manager: {}", e);
            return;
        }
    };
    manager.start_gc();

    let router = Router::new()
        .hoop(SessionHandler::new(Arc::clone(&manager)))
        .get(index)
        .push(Router::with_path("user").get(get_user))
        .push(Router::with_path("login").get(login))
        .push(Router::with_path("clear").get(clear))
        .push(Router::with_path("logout").get(logout));

    let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
    println!("Server running at http://127.0.0.1:5800");
    println!("Try these endpoints:");
    println!("  GET /                 - View counter");
    println!("  GET /user             - Get current user");
    println!("  GET /login?name=alice - Set user and regenerate the session ID");
    println!("  GET /clear            - Flush session values");
    println!("  GET /logout           - Destroy session");

    Server::new(acceptor).serve(router).await;

    if let Err(e) = manager.destroy().await {
        eprintln!("Failed to shut down session manager: {}", e);
    }
}
