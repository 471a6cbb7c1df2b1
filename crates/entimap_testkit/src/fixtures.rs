//! Test fixtures and database helpers.
//!
//! Provides canned registries and a wrapped in-memory database for
//! exercising the mapper in tests.

use std::ops::{Deref, DerefMut};
use std::sync::Once;

use entimap_core::{
    AttrKind, AttributeDef, Database, DatabaseConfig, DeletePolicy, ModelSchema, Registry,
    WriteMode,
};

/// Initializes test logging once per process.
///
/// Respects `RUST_LOG`; silent when the variable is unset.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::from_default_env();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A vendor/item catalog exercising every index kind.
///
/// `item.sku` is globally unique with prefix and suffix indexes,
/// `(name, vendor_id)` is unique as a pair, `tags` is word indexed,
/// `price` and `stock` are ordered, and deleting a vendor with items is
/// restricted.
#[must_use]
pub fn catalog_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::new("vendor")
                .attribute(AttributeDef::new("name", AttrKind::Text).unique())
                .one_to_many("items", "item", DeletePolicy::Restrict),
        )
        .expect("vendor schema");
    registry
        .register(
            ModelSchema::new("item")
                .attribute(
                    AttributeDef::new("sku", AttrKind::Text)
                        .unique()
                        .prefix()
                        .suffix(),
                )
                .attribute(AttributeDef::new("name", AttrKind::Text).prefix())
                .attribute(AttributeDef::new("tags", AttrKind::Text).words())
                .attribute(AttributeDef::new("price", AttrKind::Float).ordered())
                .attribute(AttributeDef::new("stock", AttrKind::Int).ordered())
                .foreign_key("vendor_id", "vendor")
                .unique_together(["name", "vendor_id"]),
        )
        .expect("item schema");
    registry
}

/// An author/post/comment chain where every delete cascades downward.
#[must_use]
pub fn blog_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::new("author")
                .attribute(AttributeDef::new("handle", AttrKind::Text).unique())
                .one_to_many("posts", "post", DeletePolicy::Cascade),
        )
        .expect("author schema");
    registry
        .register(
            ModelSchema::new("post")
                .attribute(AttributeDef::new("title", AttrKind::Text).prefix())
                .foreign_key("author_id", "author")
                .one_to_many("comments", "comment", DeletePolicy::Cascade),
        )
        .expect("post schema");
    registry
        .register(
            ModelSchema::new("comment")
                .attribute(AttributeDef::new("body", AttrKind::Text).words())
                .foreign_key("post_id", "post"),
        )
        .expect("comment schema");
    registry
}

/// An in-memory test database.
pub struct TestDb {
    /// The open database.
    pub db: Database,
}

impl TestDb {
    /// Opens an in-memory database with the default configuration.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, DatabaseConfig::new())
    }

    /// Opens an in-memory database with a custom configuration.
    #[must_use]
    pub fn with_config(registry: Registry, config: DatabaseConfig) -> Self {
        Self {
            db: Database::in_memory(registry, config).expect("open test database"),
        }
    }

    /// Opens an in-memory database writing in fallback mode.
    #[must_use]
    pub fn fallback(registry: Registry) -> Self {
        Self::with_config(
            registry,
            DatabaseConfig::new().with_write_mode(WriteMode::Fallback),
        )
    }

    /// Opens a database over the catalog fixture.
    #[must_use]
    pub fn catalog() -> Self {
        Self::new(catalog_registry())
    }

    /// Opens a database over the blog fixture.
    #[must_use]
    pub fn blog() -> Self {
        Self::new(blog_registry())
    }

    /// Saves one vendor and returns its id.
    pub fn seed_vendor(&self, name: &str) -> u64 {
        let mut session = self.db.session();
        let vendor = session.new_entity("vendor").expect("new vendor");
        vendor.borrow_mut().set("name", name).expect("set name");
        session.save(&vendor).expect("save vendor");
        let pk = vendor.borrow().pk();
        pk
    }

    /// Saves one fully-populated item and returns its id.
    pub fn seed_item(
        &self,
        vendor: u64,
        sku: &str,
        name: &str,
        price: f64,
        stock: i64,
        tags: &str,
    ) -> u64 {
        let mut session = self.db.session();
        let item = session.new_entity("item").expect("new item");
        {
            let mut item = item.borrow_mut();
            item.set("sku", sku).expect("set sku");
            item.set("name", name).expect("set name");
            item.set("tags", tags).expect("set tags");
            item.set("price", price).expect("set price");
            item.set("stock", stock).expect("set stock");
            item.set("vendor_id", i64::try_from(vendor).expect("vendor id"))
                .expect("set vendor_id");
        }
        session.save(&item).expect("save item");
        let pk = item.borrow().pk();
        pk
    }

    /// Saves an author with `posts` posts, each with `comments` comments.
    /// Returns the author id.
    pub fn seed_thread(&self, handle: &str, posts: usize, comments: usize) -> u64 {
        let mut session = self.db.session();
        let author = session.new_entity("author").expect("new author");
        author.borrow_mut().set("handle", handle).expect("set handle");
        session.save(&author).expect("save author");
        let author_pk = author.borrow().pk();

        for p in 0..posts {
            let post = session.new_entity("post").expect("new post");
            {
                let mut post = post.borrow_mut();
                post.set("title", format!("{handle} post {p}")).expect("set title");
                post.set("author_id", i64::try_from(author_pk).expect("author id"))
                    .expect("set author_id");
            }
            session.save(&post).expect("save post");
            let post_pk = post.borrow().pk();

            for c in 0..comments {
                let comment = session.new_entity("comment").expect("new comment");
                {
                    let mut comment = comment.borrow_mut();
                    comment
                        .set("body", format!("reply {c} to post {p}"))
                        .expect("set body");
                    comment
                        .set("post_id", i64::try_from(post_pk).expect("post id"))
                        .expect("set post_id");
                }
                session.save(&comment).expect("save comment");
            }
        }
        author_pk
    }
}

impl Deref for TestDb {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl DerefMut for TestDb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_fixture_registers_cleanly() {
        let db = TestDb::catalog();
        assert_eq!(db.models(), vec!["item", "vendor"]);
    }

    #[test]
    fn seeded_rows_are_queryable() {
        let db = TestDb::catalog();
        let vendor = db.seed_vendor("acme");
        let item = db.seed_item(vendor, "SKU-9", "anvil", 12.5, 4, "heavy iron");

        let ids = db
            .query("item")
            .unwrap()
            .filter_prefix("sku", "SKU")
            .ids()
            .unwrap();
        assert_eq!(ids, vec![item]);
    }

    #[test]
    fn thread_fixture_builds_the_chain() {
        let db = TestDb::blog();
        let author = db.seed_thread("ada", 2, 3);
        let posts = db.referrers("author", "posts", author).unwrap();
        assert_eq!(posts.len(), 2);
        let comments = db.referrers("post", "comments", posts[0]).unwrap();
        assert_eq!(comments.len(), 3);
    }
}
