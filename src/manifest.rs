use std::io::{BufReader, Read};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use bcore::digest::Algorithm;
use bcore::model::file_identifier;
use bstore::Store;

use crate::lines::Lines;
use crate::summary::Summary;

static MANIFEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S*)\s*(.*)").expect("manifest line regex"));

/// Record the digests a manifest declares onto the matching file records.
///
/// The algorithm comes from the manifest's own name. Paths that have no
/// record in the store are reported as missing from the bag. Returns the
/// number of records updated.
pub fn parse_manifest<S: Store, R: Read>(
    store: &mut S,
    bag_identifier: &str,
    manifest: &str,
    reader: R,
    summary: &mut Summary,
) -> usize {
    let alg = match Algorithm::from_manifest_name(manifest) {
        Some(alg) => alg,
        None => {
            warn!(
                "Not verifying checksums in {} - unsupported algorithm",
                manifest
            );
            return 0;
        }
    };

    let mut updated = 0;
    for (idx, line) in Lines::new(BufReader::new(reader)).enumerate() {
        if summary.is_full() {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                summary.add_error(format!("Error reading manifest '{}': {}", manifest, e));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (digest, path) = match MANIFEST_LINE.captures(&line) {
            Some(caps) if !caps[1].is_empty() && !caps[2].is_empty() => {
                (caps[1].to_string(), caps[2].to_string())
            }
            _ => {
                summary.add_error(format!(
                    "Unable to parse data from line {} of manifest {}: {}",
                    idx + 1,
                    manifest,
                    line
                ));
                continue;
            }
        };

        let identifier = file_identifier(bag_identifier, &path);
        let mut record = match store.get_file(&identifier) {
            Ok(Some(rec)) => rec,
            Ok(None) => {
                summary.add_error(format!(
                    "File '{}' in manifest '{}' is missing from bag",
                    path, manifest
                ));
                continue;
            }
            Err(e) => {
                summary.add_error(format!(
                    "Error finding '{}' in validation db: {}",
                    identifier, e
                ));
                continue;
            }
        };

        record.manifest_digests.insert(alg, digest);
        match store.save(&identifier, &record) {
            Ok(()) => updated += 1,
            Err(e) => summary.add_error(format!(
                "Error saving '{}' to validation db: {}",
                identifier, e
            )),
        }
    }

    debug!("{}: {} {} digests recorded", manifest, updated, alg);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Limits;
    use bcore::model::FileRecord;
    use bstore::MemStore;

    fn store_with(paths: &[&str]) -> MemStore {
        let mut store = MemStore::new();
        for path in paths {
            let rec = FileRecord::new("bag", path);
            store.save(&rec.identifier, &rec).unwrap();
        }
        store
    }

    #[test]
    fn records_digests() {
        let mut store = store_with(&["data/a.txt", "data/dir/b c.txt"]);
        let mut summary = Summary::new(Limits::default());

        let manifest = "aaa111  data/a.txt\n\nbbb222 data/dir/b c.txt\n";
        let updated = parse_manifest(
            &mut store,
            "bag",
            "manifest-sha256.txt",
            manifest.as_bytes(),
            &mut summary,
        );

        assert_eq!(updated, 2);
        assert!(!summary.has_errors());

        let rec = store.get_file("bag/data/a.txt").unwrap().unwrap();
        assert_eq!(rec.manifest_digests.get(&Algorithm::Sha256).unwrap(), "aaa111");
        let rec = store.get_file("bag/data/dir/b c.txt").unwrap().unwrap();
        assert_eq!(rec.manifest_digests.get(&Algorithm::Sha256).unwrap(), "bbb222");
    }

    #[test]
    fn missing_file() {
        let mut store = store_with(&["data/a.txt"]);
        let mut summary = Summary::new(Limits::default());

        parse_manifest(
            &mut store,
            "bag",
            "manifest-md5.txt",
            "aaa data/a.txt\nbbb data/gone.txt\n".as_bytes(),
            &mut summary,
        );

        assert_eq!(
            summary.errors,
            vec!["File 'data/gone.txt' in manifest 'manifest-md5.txt' is missing from bag"]
        );
    }

    #[test]
    fn unparseable_line() {
        let mut store = store_with(&["data/a.txt"]);
        let mut summary = Summary::new(Limits::default());

        parse_manifest(
            &mut store,
            "bag",
            "manifest-md5.txt",
            "aaa data/a.txt\njunkwithnopath\n".as_bytes(),
            &mut summary,
        );

        assert_eq!(
            summary.errors,
            vec!["Unable to parse data from line 2 of manifest manifest-md5.txt: junkwithnopath"]
        );
        // The good line still counts
        let rec = store.get_file("bag/data/a.txt").unwrap().unwrap();
        assert_eq!(rec.manifest_digests.get(&Algorithm::Md5).unwrap(), "aaa");
    }

    #[test]
    fn unsupported_algorithm() {
        let mut store = store_with(&["data/a.txt"]);
        let mut summary = Summary::new(Limits::default());

        let updated = parse_manifest(
            &mut store,
            "bag",
            "manifest-crc32.txt",
            "aaa data/a.txt\n".as_bytes(),
            &mut summary,
        );

        assert_eq!(updated, 0);
        assert!(!summary.has_errors());
        assert!(!store.get_file("bag/data/a.txt").unwrap().unwrap().in_any_manifest());
    }

    #[test]
    fn stops_when_full() {
        let mut store = store_with(&[]);
        let mut summary = Summary::new(Limits {
            max_errors: 2,
            max_error_len: 1024,
        });

        let manifest: String = (0..50).map(|i| format!("abc data/{}.txt\n", i)).collect();
        parse_manifest(&mut store, "bag", "manifest-md5.txt", manifest.as_bytes(), &mut summary);

        assert!(summary.is_full());
        assert_eq!(summary.errors.len(), 3);
    }
}
