//! Quire: staged bulk loading of article metadata into PostgreSQL
//!
//! This crate ingests a flat-file export of articles (one row per article,
//! carrying the publication's name) and writes two relations: `publications`
//! and `articles`, where every article references its publication by id.
//!
//! 1. **Stage** -- Load the CSV into a queryable in-memory staging area and
//!    check the database is reachable at the same time; both finish before
//!    anything is written
//! 2. **Resolve** -- Upsert the distinct publication names in fixed-size chunks
//!    and collect the name-to-id mapping
//! 3. **Transform** -- Replace each article's publication name with its id,
//!    dropping (and reporting) rows whose publication is not in the mapping
//! 4. **Load** -- Insert the resolved articles in fixed-size chunks
//!
//! # Transactions
//!
//! Each chunk is its own transaction. There is no transaction spanning the
//! whole file: when a chunk fails, chunks committed before it stay in the
//! database and the run is reported as failed with the partial counts.
//! Publication upserts are idempotent, so a failed run can be re-run;
//! article inserts are not, and a re-run duplicates articles that were
//! already committed.
//!
//! # Key Modules
//!
//! - [`staging`] -- CSV staging with scoped release
//! - [`resolve`] -- Distinct publication upsert and mapping
//! - [`transform`] -- Name-to-id substitution and missing-name tracking
//! - [`loader`] -- Chunked writes with optional bounded parallelism
//! - [`pipeline`] -- Deadline, join barrier and run outcome
//! - [`store`] -- `Repository` capability trait and in-memory implementation
//! - [`postgres`] -- sqlx-backed repository and schema bootstrap
//! - [`models`] -- Staging rows, records and the publication mapping
//! - [`stats`] -- Lock-free run counters
//! - [`config`] -- Defaults and explicit run/database configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Create tables (reads DB_* or DATABASE_URL, .env honoured)
//! quire init-db
//!
//! # Check a file without touching the database
//! quire run medium_data.csv --dry-run
//!
//! # Load with 1000-row chunks and a two minute deadline
//! quire -v run medium_data.csv --chunk-size 1000 --deadline-secs 120
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod postgres;
pub mod resolve;
pub mod staging;
pub mod stats;
pub mod store;
pub mod transform;
