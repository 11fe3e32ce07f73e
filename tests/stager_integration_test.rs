//! Integration tests for the staging pipeline, driven through the library API.

use dump_stager::batch::part_file_name;
use dump_stager::error::{LexError, StagerError};
use dump_stager::pipeline::{transform_text, Stager};
use dump_stager::rewriter::RewriteOptions;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

fn create_temp_sql(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn read_parts(dir: &Path, n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| fs::read_to_string(dir.join(part_file_name(i))).unwrap())
        .collect()
}

const PG_DUMP: &str = r#"--
-- PostgreSQL database dump
--

\restrict 4c5e2f0e9f1a

SET statement_timeout = 0;
SET lock_timeout = 0;
SET client_encoding = 'UTF8';
SELECT pg_catalog.set_config('search_path', '', false);
SET search_path = public;

--
-- Name: app; Type: SCHEMA; Schema: -; Owner: -
--

CREATE SCHEMA app;

CREATE TYPE public.mood AS ENUM ('sad', 'ok', 'happy');

--
-- Name: customers; Type: TABLE; Schema: public; Owner: -
--

CREATE TABLE public.customers (
    id integer NOT NULL,
    name text DEFAULT 'a;b'::text
);

CREATE TABLE public.orders (
    id integer NOT NULL,
    customer_id integer
);

CREATE FUNCTION public.touch() RETURNS trigger
    LANGUAGE plpgsql
    AS $$
BEGIN
    NEW.updated := now();
    RETURN NEW;
END;
$$;

COPY public.customers (id, name) FROM stdin;
1	Alice
2	Bob; the builder
\.

INSERT INTO public.orders VALUES (1, 1);
INSERT INTO public.orders VALUES (2, 2);

ALTER TABLE ONLY public.customers
    ADD CONSTRAINT customers_pkey PRIMARY KEY (id);

ALTER TABLE ONLY public.orders
    ADD CONSTRAINT fk_customer FOREIGN KEY (customer_id) REFERENCES public.customers(id);

\unrestrict 4c5e2f0e9f1a
"#;

// =============================================================================
// Partitioning
// =============================================================================

#[test]
fn test_parts_concatenate_to_flattened_output() {
    let file = create_temp_sql(PG_DUMP);
    let flat_dir = TempDir::new().unwrap();
    let flat_path = flat_dir.path().join("flat.sql");
    Stager::new(file.path().to_path_buf())
        .flatten(Some(&flat_path))
        .unwrap();
    let flattened = fs::read_to_string(&flat_path).unwrap();

    for n in [1, 2, 3, 5, 10, 11, 50] {
        let out = TempDir::new().unwrap();
        let stats = Stager::new(file.path().to_path_buf())
            .with_batch_count(n)
            .stage(out.path())
            .unwrap();

        assert_eq!(stats.batch_counts.len(), n);
        let joined: String = read_parts(out.path(), n).concat();
        assert_eq!(joined, flattened, "round trip failed for {} batches", n);
    }
}

#[test]
fn test_three_statements_into_ten_batches() {
    let file = create_temp_sql("SELECT 1;\nSELECT 2;\nSELECT 3;\n");
    let out = TempDir::new().unwrap();

    let stats = Stager::new(file.path().to_path_buf())
        .with_batch_count(10)
        .stage(out.path())
        .unwrap();

    assert_eq!(stats.batch_counts, vec![1, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
    let parts = read_parts(out.path(), 10);
    assert_eq!(parts[0], "SELECT 1;\n");
    assert_eq!(parts[2], "SELECT 3;\n");
    for part in &parts[3..] {
        assert!(part.is_empty());
    }
}

#[test]
fn test_last_batch_takes_remainder() {
    let sql: String = (0..25).map(|i| format!("SELECT {};\n", i)).collect();
    let file = create_temp_sql(&sql);
    let out = TempDir::new().unwrap();

    let stats = Stager::new(file.path().to_path_buf())
        .with_batch_count(10)
        .stage(out.path())
        .unwrap();

    assert_eq!(stats.batch_counts, vec![2, 2, 2, 2, 2, 2, 2, 2, 2, 7]);
    let last = fs::read_to_string(out.path().join("part_10.sql")).unwrap();
    assert!(last.starts_with("SELECT 18;\n"));
    assert!(last.ends_with("SELECT 24;\n"));
}

#[test]
fn test_zero_batches_rejected() {
    let file = create_temp_sql("SELECT 1;");
    let out = TempDir::new().unwrap();
    let err = Stager::new(file.path().to_path_buf())
        .with_batch_count(0)
        .stage(out.path())
        .unwrap_err();
    assert!(matches!(err, StagerError::InvalidBatchCount));
}

#[test]
fn test_header_lines() {
    let file = create_temp_sql("SELECT 1;\nSELECT 2;\n");
    let out = TempDir::new().unwrap();

    Stager::new(file.path().to_path_buf())
        .with_batch_count(2)
        .with_header(true)
        .stage(out.path())
        .unwrap();

    let first = fs::read_to_string(out.path().join("part_1.sql")).unwrap();
    assert_eq!(
        first,
        "-- dump-stager part 1 of 2 (1 statements)\nSELECT 1;\n"
    );
}

// =============================================================================
// Filtering and rewriting
// =============================================================================

#[test]
fn test_filtering() {
    let sql = "\\restrict abc\nSET statement_timeout = 0;\nSET search_path = public;\nCREATE TABLE t (id int);\n";
    let out = transform_text(sql, &RewriteOptions::default()).unwrap();
    let texts: Vec<&str> = out.statements.iter().map(|s| s.text.as_str()).collect();

    assert_eq!(
        texts,
        vec![
            "SET search_path = public;",
            "CREATE TABLE IF NOT EXISTS t (id int);"
        ]
    );
}

#[test]
fn test_pg_dump_rewrites() {
    let out = transform_text(PG_DUMP, &RewriteOptions::default()).unwrap();
    let flat: String = out
        .statements
        .iter()
        .map(|s| format!("{}\n", s.text))
        .collect();

    assert!(!flat.contains("\\restrict"));
    assert!(!flat.contains("\\unrestrict"));
    assert!(!flat.contains("statement_timeout"));
    assert!(!flat.contains("client_encoding"));
    assert!(!flat.contains("-- Name:"));
    assert!(flat.contains("SET search_path = public;"));
    assert!(flat.contains("SELECT pg_catalog.set_config('search_path', '', false);"));
    assert!(flat.contains("CREATE SCHEMA IF NOT EXISTS app;"));
    assert!(flat.contains("CREATE TYPE IF NOT EXISTS public.mood AS ENUM"));
    assert!(flat.contains("CREATE TABLE IF NOT EXISTS public.customers ("));
    assert!(flat.contains("CREATE TABLE IF NOT EXISTS public.orders ("));
    assert!(flat.contains("2\tBob; the builder\n\\.\n"));
    assert!(flat.contains("conname = 'customers_pkey' AND conrelid = 'public.customers'::regclass"));
    assert!(flat.contains("conname = 'fk_customer' AND conrelid = 'public.orders'::regclass"));
    assert_eq!(out.warnings.count(), 0);
}

#[test]
fn test_constraint_clause_is_byte_identical() {
    let clause = "ALTER TABLE orders ADD CONSTRAINT fk_customer FOREIGN KEY (customer_id) REFERENCES customers(id);";
    let out = transform_text(clause, &RewriteOptions::default()).unwrap();

    assert_eq!(out.statements.len(), 1);
    let text = &out.statements[0].text;
    assert!(text.starts_with("DO $guard$"));
    assert!(text.contains("pg_catalog.pg_constraint"));
    assert!(text.contains("conname = 'fk_customer'"));
    assert!(text.contains(&format!("\n        {}\n", clause)));
}

#[test]
fn test_rewrite_is_idempotent() {
    let options = RewriteOptions::default();
    let once = transform_text(PG_DUMP, &options).unwrap();
    let once_text: String = once
        .statements
        .iter()
        .map(|s| format!("{}\n", s.text))
        .collect();

    let twice = transform_text(&once_text, &options).unwrap();
    let twice_text: String = twice
        .statements
        .iter()
        .map(|s| format!("{}\n", s.text))
        .collect();

    assert_eq!(once_text, twice_text);
    assert_eq!(twice.rewritten, 0);
}

#[test]
fn test_degraded_constraint_is_kept_and_warned() {
    let sql = "ALTER TABLE t ADD CONSTRAINT;\nSELECT 1;\n";
    let out = transform_text(sql, &RewriteOptions::default()).unwrap();

    assert_eq!(out.statements[0].text, "ALTER TABLE t ADD CONSTRAINT;");
    assert_eq!(out.warnings.degraded_count(), 1);
}

#[test]
fn test_quoted_keywords_do_not_change_statements() {
    let sql = "ALTER TABLE t ADD COLUMN note text DEFAULT 'ADD CONSTRAINT t_pkey later';\n\
               COPY (SELECT 'x FROM stdin') TO stdout;\n\
               CREATE TABLE a (id int);\n";
    let out = transform_text(sql, &RewriteOptions::default()).unwrap();

    let texts: Vec<&str> = out.statements.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "ALTER TABLE t ADD COLUMN note text DEFAULT 'ADD CONSTRAINT t_pkey later';",
            "COPY (SELECT 'x FROM stdin') TO stdout;",
            "CREATE TABLE IF NOT EXISTS a (id int);",
        ]
    );
    assert_eq!(out.rewritten, 1);
    assert!(!out.warnings.has_warnings());
}

#[test]
fn test_strict_mode_fails_on_warning() {
    let file = create_temp_sql("ALTER TABLE t ADD CONSTRAINT;\n");
    let out = TempDir::new().unwrap();
    let target = out.path().join("parts");

    let err = Stager::new(file.path().to_path_buf())
        .with_strict(true)
        .stage(&target)
        .unwrap_err();

    assert!(matches!(err, StagerError::StrictModeViolation { count: 1, .. }));
    assert!(!target.exists());
}

#[test]
fn test_unterminated_trailing_statement() {
    let out = transform_text("SELECT 1;\nSELECT 2 -- no end", &RewriteOptions::default()).unwrap();
    assert_eq!(out.statements[1].text, "SELECT 2 -- no end\n;");
    assert_eq!(out.warnings.count(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_malformed_input_writes_nothing() {
    let file = create_temp_sql("SELECT 1;\nSELECT 2;\nINSERT INTO t VALUES ('oops);\nSELECT 3;\n");
    let out = TempDir::new().unwrap();
    let target = out.path().join("parts");

    let err = Stager::new(file.path().to_path_buf())
        .stage(&target)
        .unwrap_err();

    match err {
        StagerError::Lex(LexError::UnterminatedQuote { line, .. }) => assert_eq!(line, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!target.exists());
}

#[test]
fn test_malformed_input_leaves_existing_parts_alone() {
    let out = TempDir::new().unwrap();
    fs::write(out.path().join("part_1.sql"), "SELECT 'old';\n").unwrap();

    let file = create_temp_sql("DO $$ BEGIN");
    assert!(Stager::new(file.path().to_path_buf())
        .stage(out.path())
        .is_err());

    let kept = fs::read_to_string(out.path().join("part_1.sql")).unwrap();
    assert_eq!(kept, "SELECT 'old';\n");
}

#[test]
fn test_missing_input_is_io_error() {
    let out = TempDir::new().unwrap();
    let err = Stager::new(out.path().join("missing.sql"))
        .stage(out.path())
        .unwrap_err();
    assert!(matches!(err, StagerError::Io { .. }));
}

// =============================================================================
// Modes and stats
// =============================================================================

#[test]
fn test_dry_run_writes_nothing() {
    let file = create_temp_sql(PG_DUMP);
    let out = TempDir::new().unwrap();
    let target = out.path().join("parts");

    let stats = Stager::new(file.path().to_path_buf())
        .with_dry_run(true)
        .stage(&target)
        .unwrap();

    assert!(stats.dry_run);
    assert_eq!(stats.batch_counts.iter().sum::<usize>(), stats.statements_written);
    assert!(!target.exists());
}

#[test]
fn test_stale_parts_reported() {
    let file = create_temp_sql(PG_DUMP);
    let out = TempDir::new().unwrap();
    fs::write(out.path().join("part_5.sql"), "SELECT 'old';\n").unwrap();

    let stats = Stager::new(file.path().to_path_buf())
        .with_batch_count(3)
        .stage(out.path())
        .unwrap();
    assert_eq!(
        stats.stale_parts,
        vec![out.path().join("part_5.sql").display().to_string()]
    );

    let dry = Stager::new(file.path().to_path_buf())
        .with_batch_count(5)
        .with_dry_run(true)
        .stage(out.path())
        .unwrap();
    assert!(dry.stale_parts.is_empty());
}

#[test]
fn test_analyze_stats() {
    let file = create_temp_sql(PG_DUMP);
    let stats = Stager::new(file.path().to_path_buf()).analyze().unwrap();

    assert_eq!(stats.kinds["create_table"], 2);
    assert_eq!(stats.kinds["add_constraint"], 2);
    assert_eq!(stats.kinds["meta_command"], 2);
    assert_eq!(stats.dropped["meta-command"], 2);
    assert_eq!(stats.dropped["session setting"], 3);
    assert!(stats.batch_counts.is_empty());
    assert!(stats.warnings.is_empty());
}

#[test]
fn test_gzip_input() {
    use flate2::write::GzEncoder;
    use flate2::Compression as GzLevel;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.sql.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), GzLevel::default());
    encoder.write_all(b"CREATE TABLE t (id int);\n").unwrap();
    encoder.finish().unwrap();

    let out = dir.path().join("flat.sql");
    Stager::new(path).flatten(Some(&out)).unwrap();
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "CREATE TABLE IF NOT EXISTS t (id int);\n"
    );
}

#[test]
fn test_progress_callback_reports_bytes() {
    use std::cell::Cell;
    use std::rc::Rc;

    let file = create_temp_sql(PG_DUMP);
    let seen = Rc::new(Cell::new(0u64));
    let seen_clone = Rc::clone(&seen);

    Stager::new(file.path().to_path_buf())
        .with_progress(move |bytes| seen_clone.set(bytes))
        .analyze()
        .unwrap();

    assert_eq!(seen.get(), PG_DUMP.len() as u64);
}
