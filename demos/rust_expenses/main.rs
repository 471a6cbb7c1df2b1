//! Basic entimap Example - Expense Tracker
//!
//! This example demonstrates core entimap functionality:
//! - Declaring models with indexed attributes and a relationship
//! - Saving entities through an identity-mapped session
//! - Range, word, and prefix queries over secondary indexes
//! - Paginating a cached result set
//! - Cascading deletes through a foreign key
//!
//! Run with: cargo run -p rust_expenses

use std::sync::Arc;

use entimap_core::{
    AttrKind, AttrValue, AttributeDef, Database, DatabaseConfig, DeletePolicy, ModelSchema,
    Registry,
};
use entimap_store::InMemoryStore;

/// An account owning expenses, and the expenses themselves.
fn registry() -> Result<Registry, Box<dyn std::error::Error>> {
    let mut registry = Registry::new();
    registry.register(
        ModelSchema::new("account")
            .attribute(AttributeDef::new("name", AttrKind::Text).unique())
            .one_to_many("expenses", "expense", DeletePolicy::Cascade),
    )?;
    registry.register(
        ModelSchema::new("expense")
            .attribute(AttributeDef::new("description", AttrKind::Text).prefix())
            .attribute(AttributeDef::new("tags", AttrKind::Text).words())
            .attribute(AttributeDef::new("amount", AttrKind::Float).ordered())
            .foreign_key("account_id", "account"),
    )?;
    Ok(registry)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Expense Tracker Example");
    println!("=======================\n");

    // Open a database over the in-memory store engine
    let store = Arc::new(InMemoryStore::new());
    let db = Database::new(store, registry()?, DatabaseConfig::new())?;
    println!("[OK] Database opened successfully");

    // Create an account and some expenses in one session
    let mut session = db.session();
    let account = session.new_entity("account")?;
    account.borrow_mut().set("name", "personal")?;
    session.save(&account)?;
    let account_pk = account.borrow().pk();

    let expenses = [
        ("coffee beans", 14.50, "groceries food"),
        ("train ticket", 36.00, "travel commute"),
        ("mechanical keyboard", 89.99, "office hardware"),
        ("coffee to go", 4.20, "food"),
        ("hotel night", 120.00, "travel lodging"),
    ];

    println!("\n[+] Inserting {} expenses...", expenses.len());
    for (description, amount, tags) in expenses {
        let expense = session.new_entity("expense")?;
        {
            let mut expense = expense.borrow_mut();
            expense.set("description", description)?;
            expense.set("amount", amount)?;
            expense.set("tags", tags)?;
            expense.set("account_id", i64::try_from(account_pk)?)?;
        }
        session.save(&expense)?;
    }
    println!("[OK] Expenses inserted");

    // Range query over the ordered amount index
    println!("\n[*] Expenses up to 40.00, cheapest first:");
    let cheap = db
        .query("expense")?
        .filter_at_most("amount", 40.0)
        .order_by("amount")
        .execute(&mut session)?;
    for expense in &cheap {
        let expense = expense.borrow();
        if let (Some(AttrValue::Float(amount)), Some(description)) = (
            expense.get("amount"),
            expense.get("description").and_then(AttrValue::as_text),
        ) {
            println!("  {amount:>8.2}  {description}");
        }
    }

    // Word search over the tag index
    println!("\n[!] Travel expenses:");
    let travel = db
        .query("expense")?
        .filter_words("tags", "travel")
        .execute(&mut session)?;
    for expense in &travel {
        let expense = expense.borrow();
        if let Some(description) = expense.get("description").and_then(AttrValue::as_text) {
            println!("  {description}");
        }
    }

    // Prefix search over descriptions
    let coffees = db
        .query("expense")?
        .filter_prefix("description", "coffee")
        .count()?;
    println!("\n[#] Coffee purchases so far: {coffees}");

    // Update an expense; the session hands back the same instance
    println!("\n[~] Correcting the hotel price...");
    if let Some(hotel) = db
        .query("expense")?
        .filter_prefix("description", "hotel")
        .first(&mut session)?
    {
        hotel.borrow_mut().set("amount", 135.00)?;
        session.save(&hotel)?;
    }

    // Page through every expense via a cached snapshot
    println!("\n[*] All expenses, two per page:");
    let snapshot = db
        .query("expense")?
        .order_by("-amount")
        .cached_result(None)?;
    let mut offset = 0;
    loop {
        let page = snapshot.page(offset, 2)?;
        if page.is_empty() {
            break;
        }
        println!("  page {}: {page:?}", offset / 2 + 1);
        offset += page.len();
    }

    // Deleting the account cascades through its expenses
    println!("\n[-] Deleting the account...");
    let removed = session.delete(&account)?;
    println!("[OK] Removed {removed} entities");

    let remaining = db.query("expense")?.filter_reference("account_id", account_pk);
    println!("[#] Expenses left for the account: {}", remaining.count()?);

    Ok(())
}
