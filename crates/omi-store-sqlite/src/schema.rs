//! SQL schema for the OMI SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Zones are append-only per semester: rows are inserted or ignored, never
-- updated.
CREATE TABLE IF NOT EXISTS zones (
    join_key          TEXT NOT NULL
                      CHECK (join_key GLOB '[A-Z][A-Z][0-9][0-9][0-9][0-9][0-9][0-9][0-9][0-9]'),
    semester          TEXT NOT NULL
                      CHECK (semester GLOB '[0-9][0-9][0-9][0-9]_S[12]'),
    zone_code         TEXT NOT NULL,
    band              TEXT,            -- source letter: B, C, D, E, R, ...
    admin_code        TEXT NOT NULL,
    municipality_name TEXT,
    province_code     TEXT,
    description       TEXT,
    geometry_json     TEXT NOT NULL,   -- JSON-encoded multi-polygon, lon/lat
    ring_count        INTEGER NOT NULL CHECK (ring_count >= 1),
    min_lon           REAL NOT NULL,
    min_lat           REAL NOT NULL,
    max_lon           REAL NOT NULL,
    max_lat           REAL NOT NULL,
    loaded_at         TEXT NOT NULL,   -- RFC 3339 UTC
    PRIMARY KEY (join_key, semester)
);

-- Replaced wholesale per semester. No foreign key to zones: a quotation
-- may reference a zone that has no polygon.
CREATE TABLE IF NOT EXISTS quotations (
    join_key           TEXT NOT NULL
                       CHECK (join_key GLOB '[A-Z][A-Z][0-9][0-9][0-9][0-9][0-9][0-9][0-9][0-9]'),
    semester           TEXT NOT NULL
                       CHECK (semester GLOB '[0-9][0-9][0-9][0-9]_S[12]'),
    property_type_code INTEGER NOT NULL,
    property_type_desc TEXT,
    conservation_state TEXT NOT NULL,
    is_prevalent       INTEGER NOT NULL CHECK (is_prevalent IN (0, 1)),
    price_min          REAL,
    price_max          REAL,
    sale_surface       TEXT CHECK (sale_surface IN ('L', 'N')),
    rent_min           REAL,
    rent_max           REAL,
    rent_surface       TEXT CHECK (rent_surface IN ('L', 'N')),
    loaded_at          TEXT NOT NULL,
    PRIMARY KEY (join_key, semester, property_type_code, conservation_state)
);

CREATE INDEX IF NOT EXISTS zones_semester_idx ON zones(semester);
CREATE INDEX IF NOT EXISTS zones_bbox_idx     ON zones(semester, min_lon, max_lon);

CREATE INDEX IF NOT EXISTS quotations_semester_idx ON quotations(semester);
CREATE UNIQUE INDEX IF NOT EXISTS quotations_prevalent_idx
    ON quotations(join_key, semester, property_type_code)
    WHERE is_prevalent = 1;

PRAGMA user_version = 1;
";
