//! # Seed Data Generator
//!
//! Populates a database with demo authors and books, then runs a few
//! queries against them.
//!
//! ## Usage
//! ```bash
//! # Generate 500 books (default)
//! cargo run -p quarry-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p quarry-db --bin seed -- --count 2000
//!
//! # Specify database path
//! cargo run -p quarry-db --bin seed -- --db ./data/quarry.db
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info,quarry=debug,sqlx=warn`).

use std::env;

use quarry_core::{
    predicate, record_of, Entity, Field, FilterOp, FilterSpec, Model, OrderSpec, PageRequest,
    QueryRequest, Relation, Schema, Value, ValueType,
};
use quarry_db::{Database, DbConfig};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const AUTHORS: &[(&str, &str)] = &[
    ("Ursula K. Le Guin", "US"),
    ("Stanisław Lem", "PL"),
    ("Octavia E. Butler", "US"),
    ("Iain M. Banks", "GB"),
    ("Liu Cixin", "CN"),
    ("N. K. Jemisin", "US"),
    ("Arkady Strugatsky", "RU"),
    ("Ted Chiang", "US"),
];

const WORDS: &[&str] = &[
    "Dispossessed", "Solaris", "Kindred", "Excession", "Ball", "Lightning", "Obelisk", "Picnic",
    "Roadside", "Exhalation", "Lathe", "Heaven", "Fifth", "Season", "Player", "Games", "Dark",
    "Forest", "Cyberiad", "Parable",
];

const GENRES: &[&str] = &["novel", "novella", "collection"];

// =============================================================================
// Demo Entities
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Author {
    id: i64,
    name: String,
    country: String,
}

impl Model for Author {
    const NAME: &'static str = "author";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(Field::new("name", ValueType::Text).searchable().sortable().required())
            .field(Field::new("country", ValueType::Text).searchable_with(&[FilterOp::Equals]))
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "country" => Some(self.country.as_str().into()),
            _ => None,
        }
    }
}

impl Entity for Author {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Book {
    id: i64,
    title: String,
    genre: String,
    pages: i64,
    author_id: i64,
    #[serde(skip)]
    author: Option<Author>,
}

impl Model for Book {
    const NAME: &'static str = "book";

    fn schema() -> Schema {
        Schema::new(Self::NAME)
            .field(Field::new("id", ValueType::Int).key())
            .field(Field::new("title", ValueType::Text).searchable().sortable().required())
            .field(Field::new("genre", ValueType::Enum(GENRES)).searchable_with(&[FilterOp::Equals]))
            .field(
                Field::new("pages", ValueType::Int)
                    .searchable_with(&[FilterOp::GreaterThan, FilterOp::LessThan])
                    .sortable(),
            )
            .field(Field::new("author_id", ValueType::Int))
            .field(Field::new("author", ValueType::Model(Author::schema)).sortable())
    }

    fn read(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.as_str().into()),
            "genre" => Some(self.genre.as_str().into()),
            "pages" => Some(self.pages.into()),
            "author_id" => Some(self.author_id.into()),
            "author" => Some(record_of(self.author.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Book {
    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::reference::<Author>(
            "author",
            |book: &Book| vec![book.author_id.into()],
            |book: &mut Book, author: Option<Author>| book.author = author,
        )]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,quarry=debug,sqlx=warn")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./quarry_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Quarry Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of books to generate (default: 500)");
                println!("  -d, --db <PATH>    Database file path (default: ./quarry_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Quarry Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!("Books:    {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let cancel = CancellationToken::new();

    let schema = db.migration_status().await?;
    println!("✓ Connected to database");
    println!(
        "✓ Migrations applied ({} of {})",
        schema.applied.len(),
        schema.embedded.len()
    );

    let uow = db.unit_of_work().await?;
    let books = uow.repository::<Book>()?;

    let existing = books.all()?.count(&cancel).await?;
    if existing > 0 {
        println!("⚠ Database already has {} books", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        uow.dispose().await;
        return Ok(());
    }

    // Generate
    println!();
    println!("Generating catalog...");
    let start = std::time::Instant::now();

    let authors = uow.repository::<Author>()?;
    for (idx, (name, country)) in AUTHORS.iter().enumerate() {
        authors.add(Author {
            id: idx as i64 + 1,
            name: name.to_string(),
            country: country.to_string(),
        })?;
    }

    for seed in 0..count {
        books.add(generate_book(seed))?;
    }

    let summary = uow.commit(&cancel).await?;
    let elapsed = start.elapsed();
    println!();
    println!("✓ Inserted {} documents in {:?}", summary.inserted, elapsed);

    // Exercise the query surface
    println!();
    println!("Running sample queries...");

    let found = books.get_filtered("solaris", None, &[])?.count(&cancel).await?;
    println!("  Search 'solaris': {} books", found);

    let long = predicate::greater_than::<Book>("pages", 400)?;
    let first_long = books
        .get_all_where(long, &["author"])?
        .order_by(OrderSpec::desc("pages"))?
        .first(&cancel)
        .await?;
    if let Some(book) = first_long {
        let author = book.author.map(|a| a.name).unwrap_or_default();
        println!("  Longest: '{}' by {} ({} pages)", book.title, author, book.pages);
    }

    let by_author = books
        .all()?
        .order_by("author.name")?
        .then_by("title")?
        .page(PageRequest::new(1, 5)?, &cancel)
        .await?;
    println!(
        "  First page by author: {} of {} books",
        by_author.items.len(),
        by_author.total
    );

    let request = QueryRequest {
        page: Some(1),
        page_size: Some(10),
        search: None,
        order: Some("pages:desc".to_string()),
        filters: vec![FilterSpec::new("genre", FilterOp::Equals, "novella")],
    };
    let novellas = books.query(&request, &cancel).await?;
    println!("  Novellas: {} total", novellas.total);

    uow.dispose().await;

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates a single book with deterministic data.
fn generate_book(seed: usize) -> Book {
    let first = WORDS[seed % WORDS.len()];
    let second = WORDS[(seed * 7 + 3) % WORDS.len()];

    Book {
        id: seed as i64 + 1,
        title: format!("{} {} {}", first, second, seed / WORDS.len() + 1),
        genre: GENRES[seed % GENRES.len()].to_string(),
        pages: 80 + ((seed * 37) % 520) as i64,
        author_id: (seed % AUTHORS.len()) as i64 + 1,
        author: None,
    }
}
