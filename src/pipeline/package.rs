//! Package writing: [`DeckSpec`] + [`MediaManifest`] → `.apkg` file.
//!
//! The package is a zip archive holding a legacy (schema 11) Anki collection
//! in `collection.anki2`, a `media` index mapping `"0"`, `"1"`, … to file
//! names, and the media files themselves stored under those numbers.
//!
//! Before anything is written the deck is checked against the manifest:
//! every referenced image must be in the manifest and every manifest file
//! must be readable. Either failure aborts the request.

use crate::error::Lecture2AnkiError;
use crate::pipeline::assemble::{DeckSpec, IMAGE_FIELD_INDEX};
use crate::pipeline::media::{image_sources, MediaManifest};
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const SCHEMA: &str = r#"
CREATE TABLE col (
    id              integer primary key,
    crt             integer not null,
    mod             integer not null,
    scm             integer not null,
    ver             integer not null,
    dty             integer not null,
    usn             integer not null,
    ls              integer not null,
    conf            text not null,
    models          text not null,
    decks           text not null,
    dconf           text not null,
    tags            text not null
);
CREATE TABLE notes (
    id              integer primary key,
    guid            text not null,
    mid             integer not null,
    mod             integer not null,
    usn             integer not null,
    tags            text not null,
    flds            text not null,
    sfld            integer not null,
    csum            integer not null,
    flags           integer not null,
    data            text not null
);
CREATE TABLE cards (
    id              integer primary key,
    nid             integer not null,
    did             integer not null,
    ord             integer not null,
    mod             integer not null,
    usn             integer not null,
    type            integer not null,
    queue           integer not null,
    due             integer not null,
    ivl             integer not null,
    factor          integer not null,
    reps            integer not null,
    lapses          integer not null,
    left            integer not null,
    odue            integer not null,
    odid            integer not null,
    flags           integer not null,
    data            text not null
);
CREATE TABLE revlog (
    id              integer primary key,
    cid             integer not null,
    usn             integer not null,
    ease            integer not null,
    ivl             integer not null,
    lastIvl         integer not null,
    factor          integer not null,
    time            integer not null,
    type            integer not null
);
CREATE TABLE graves (
    usn             integer not null,
    oid             integer not null,
    type            integer not null
);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_revlog_cid on revlog (cid);
CREATE INDEX ix_notes_csum on notes (csum);
"#;

/// Name of the collection database inside the archive.
pub const COLLECTION_ENTRY: &str = "collection.anki2";
/// Name of the media index inside the archive.
pub const MEDIA_ENTRY: &str = "media";

/// Check that the deck and manifest agree.
///
/// # Errors
/// * [`Lecture2AnkiError::DanglingMediaReference`]: an Image field names a
///   file that is not in the manifest
/// * [`Lecture2AnkiError::MissingMedia`]: a manifest file is gone or unreadable
pub fn validate(deck: &DeckSpec, manifest: &MediaManifest) -> Result<(), Lecture2AnkiError> {
    for (pos, note) in deck.notes.iter().enumerate() {
        let image = note.fields.get(IMAGE_FIELD_INDEX).map(String::as_str).unwrap_or("");
        for name in note.media_names.iter().cloned().chain(image_sources(image)) {
            if !manifest.contains_name(&name) {
                return Err(Lecture2AnkiError::DanglingMediaReference {
                    note: pos + 1,
                    file_name: name,
                });
            }
        }
    }

    for asset in manifest.assets() {
        let meta = std::fs::metadata(&asset.source_path).map_err(|e| {
            Lecture2AnkiError::MissingMedia {
                path: asset.source_path.clone(),
                detail: e.to_string(),
            }
        })?;
        if !meta.is_file() {
            return Err(Lecture2AnkiError::MissingMedia {
                path: asset.source_path.clone(),
                detail: "not a regular file".into(),
            });
        }
    }
    Ok(())
}

/// Validate, then write `<out_dir>/<file_name>`. Returns the package path.
///
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn write_package(
    deck: &DeckSpec,
    manifest: &MediaManifest,
    out_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, Lecture2AnkiError> {
    validate(deck, manifest)?;

    let db_path = out_dir.join(COLLECTION_ENTRY);
    if db_path.exists() {
        std::fs::remove_file(&db_path)
            .map_err(|e| Lecture2AnkiError::PackageWriteFailed(format!("stale collection: {e}")))?;
    }
    write_collection(deck, &db_path)?;

    let out_path = out_dir.join(file_name);
    let file = File::create(&out_path)
        .map_err(|e| Lecture2AnkiError::PackageWriteFailed(format!("{}: {e}", out_path.display())))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(COLLECTION_ENTRY, options)?;
    let db_bytes = std::fs::read(&db_path)
        .map_err(|e| Lecture2AnkiError::PackageWriteFailed(format!("collection: {e}")))?;
    zip.write_all(&db_bytes).map_err(io_failed)?;

    let mut index = Map::new();
    for (i, asset) in manifest.assets().iter().enumerate() {
        let bytes = std::fs::read(&asset.source_path).map_err(|e| Lecture2AnkiError::MissingMedia {
            path: asset.source_path.clone(),
            detail: e.to_string(),
        })?;
        // Images are already compressed.
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(i.to_string(), stored)?;
        zip.write_all(&bytes).map_err(io_failed)?;
        index.insert(i.to_string(), Value::String(asset.file_name.clone()));
    }

    zip.start_file(MEDIA_ENTRY, options)?;
    zip.write_all(Value::Object(index).to_string().as_bytes())
        .map_err(io_failed)?;

    let mut writer = zip.finish()?;
    writer.flush().map_err(io_failed)?;

    info!(
        "Wrote {} ({} notes, {} media files)",
        out_path.display(),
        deck.notes.len(),
        manifest.len()
    );
    Ok(out_path)
}

fn io_failed(e: std::io::Error) -> Lecture2AnkiError {
    Lecture2AnkiError::PackageWriteFailed(format!("io: {e}"))
}

/// Create the SQLite collection for `deck` at `path`.
fn write_collection(deck: &DeckSpec, path: &Path) -> Result<(), Lecture2AnkiError> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let now_s = now_ms / 1000;

    let mut conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;

    conn.execute(
        "INSERT INTO col VALUES (1, ?1, ?2, ?2, 11, 0, 0, 0, ?3, ?4, ?5, ?6, '{}')",
        params![
            now_s,
            now_ms,
            collection_conf(deck).to_string(),
            models_json(deck, now_s).to_string(),
            decks_json(deck, now_s).to_string(),
            dconf_json().to_string(),
        ],
    )?;

    let tx = conn.transaction()?;
    {
        let mut note_stmt = tx.prepare(
            "INSERT INTO notes VALUES (?1, ?2, ?3, ?4, -1, '', ?5, ?6, ?7, 0, '')",
        )?;
        let mut card_stmt = tx.prepare(
            "INSERT INTO cards VALUES (?1, ?2, ?3, 0, ?4, -1, 0, 0, ?5, 0, 0, 0, 0, 0, 0, 0, 0, '')",
        )?;
        for (pos, note) in deck.notes.iter().enumerate() {
            let id = now_ms + pos as i64;
            note_stmt.execute(params![
                id,
                note.guid,
                deck.template.model_id,
                now_s,
                join_fields(&note.fields),
                note.sort_field(),
                field_checksum(note.sort_field()),
            ])?;
            card_stmt.execute(params![id, id, deck.deck_id, now_s, pos as i64 + 1])?;
        }
    }
    tx.commit()?;
    debug!("Collection written to {}", path.display());
    Ok(())
}

/// Fields joined with the unit separator; a stray separator inside a value
/// becomes a space so the field count stays fixed.
pub fn join_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| f.replace(FIELD_SEPARATOR, " "))
        .collect::<Vec<_>>()
        .join(&FIELD_SEPARATOR.to_string())
}

const FIELD_SEPARATOR: char = '\x1f';

/// First 8 hex digits of SHA-1 over the sort field, as an integer.
pub fn field_checksum(sort_field: &str) -> i64 {
    let digest = Sha1::digest(sort_field.as_bytes());
    let mut head = [0u8; 4];
    head.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(head) as i64
}

fn collection_conf(deck: &DeckSpec) -> Value {
    json!({
        "activeDecks": [1],
        "curDeck": deck.deck_id,
        "newSpread": 0,
        "collapseTime": 1200,
        "timeLim": 0,
        "estTimes": true,
        "dueCounts": true,
        "curModel": deck.template.model_id.to_string(),
        "nextPos": deck.notes.len() + 1,
        "sortType": "noteFld",
        "sortBackwards": false,
        "addToCur": true
    })
}

fn models_json(deck: &DeckSpec, now_s: i64) -> Value {
    let t = &deck.template;
    let fields: Vec<Value> = t
        .fields
        .iter()
        .enumerate()
        .map(|(ord, name)| {
            json!({
                "name": name,
                "ord": ord,
                "sticky": false,
                "rtl": false,
                "font": "Arial",
                "size": 20,
                "media": []
            })
        })
        .collect();

    let model = json!({
        "id": t.model_id,
        "name": t.name,
        "type": 0,
        "mod": now_s,
        "usn": -1,
        "sortf": 0,
        "did": deck.deck_id,
        "tmpls": [{
            "name": "Card 1",
            "ord": 0,
            "qfmt": t.front,
            "afmt": t.back,
            "did": null,
            "bqfmt": "",
            "bafmt": ""
        }],
        "flds": fields,
        "css": t.css,
        "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n",
        "latexPost": "\\end{document}",
        "latexsvg": false,
        "tags": [],
        "vers": [],
        "req": [[0, "any", [0]]]
    });

    let mut models = Map::new();
    models.insert(t.model_id.to_string(), model);
    Value::Object(models)
}

fn deck_entry(id: i64, name: &str, now_s: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "desc": "",
        "mod": now_s,
        "usn": -1,
        "collapsed": false,
        "browserCollapsed": false,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0],
        "dyn": 0,
        "conf": 1,
        "extendNew": 10,
        "extendRev": 50
    })
}

fn decks_json(deck: &DeckSpec, now_s: i64) -> Value {
    let mut decks = Map::new();
    decks.insert("1".into(), deck_entry(1, "Default", now_s));
    decks.insert(deck.deck_id.to_string(), deck_entry(deck.deck_id, &deck.name, now_s));
    Value::Object(decks)
}

fn dconf_json() -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": 0,
            "usn": 0,
            "maxTaken": 60,
            "autoplay": true,
            "timer": 0,
            "replayq": true,
            "dyn": false,
            "new": {
                "delays": [1, 10],
                "ints": [1, 4, 7],
                "initialFactor": 2500,
                "order": 1,
                "perDay": 20,
                "bury": true,
                "separate": true
            },
            "rev": {
                "perDay": 100,
                "ease4": 1.3,
                "fuzz": 0.05,
                "ivlFct": 1,
                "maxIvl": 36500,
                "bury": true,
                "minSpace": 1
            },
            "lapse": {
                "delays": [10],
                "mult": 0,
                "minInt": 1,
                "leechFails": 8,
                "leechAction": 0
            }
        }
    })
}

/// `"<deck name>.apkg"` with characters unsafe in file names or HTTP headers
/// replaced by `_`.
pub fn package_file_name(deck_name: &str) -> String {
    let cleaned: String = deck_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "deck.apkg".to_string()
    } else {
        format!("{cleaned}.apkg")
    }
}
