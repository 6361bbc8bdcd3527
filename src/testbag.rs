use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use tar::{Builder, EntryType, Header};

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Bag contents built up in memory then written out as a directory or tar.
#[derive(Default, Clone)]
pub struct TestBag {
    files: Vec<(String, Vec<u8>)>,
}

impl TestBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bag that passes the default rules.
    pub fn standard() -> Self {
        TestBag::new()
            .file(
                "bagit.txt",
                b"BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
            )
            .file(
                "bag-info.txt",
                b"Source-Organization: example.edu\nBag-Count: 1 of 1\n",
            )
            .file("aptrust-info.txt", b"Title: Test Bag\nAccess: Institution\n")
            .file("data/one.txt", b"one")
            .file("data/sub/two.txt", b"two two")
            .manifest("md5")
            .manifest("sha256")
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.retain(|(p, _)| p != path);
        self.files.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn without(mut self, path: &str) -> Self {
        self.files.retain(|(p, _)| p != path);
        self
    }

    /// Add `manifest-<alg>.txt` listing every payload file added so far.
    pub fn manifest(self, alg: &str) -> Self {
        let mut manifest = String::new();
        for (path, data) in &self.files {
            if !path.starts_with("data/") {
                continue;
            }
            let digest = match alg {
                "md5" => md5_hex(data),
                "sha256" => sha256_hex(data),
                "sha512" => sha512_hex(data),
                _ => panic!("no test digest for {}", alg),
            };
            manifest.push_str(&format!("{}  {}\n", digest, path));
        }
        self.file(&format!("manifest-{}.txt", alg), manifest.as_bytes())
    }

    pub fn data(&self, path: &str) -> &[u8] {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, d)| d.as_slice())
            .unwrap()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn write_dir(&self, parent: &Path, name: &str) -> PathBuf {
        let root = parent.join(name);
        fs::create_dir_all(&root).unwrap();
        for (path, data) in &self.files {
            let target = root.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, data).unwrap();
        }
        root
    }

    pub fn write_tar(&self, parent: &Path, tar_name: &str, top_dir: &str) -> PathBuf {
        let path = parent.join(tar_name);
        let mut builder = Builder::new(File::create(&path).unwrap());

        let mut header = Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(EntryType::Directory);
        builder
            .append_data(&mut header, format!("{}/", top_dir), io::empty())
            .unwrap();

        for (file, data) in &self.files {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_500_000_000);
            header.set_entry_type(EntryType::Regular);
            builder
                .append_data(&mut header, format!("{}/{}", top_dir, file), data.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
        path
    }

    /// Like `write_tar`, but every file's path and size live only in a PAX
    /// header. The ustar header carries a short stand-in name and size 0.
    pub fn write_pax_tar(&self, parent: &Path, tar_name: &str, top_dir: &str) -> PathBuf {
        let path = parent.join(tar_name);
        let mut builder = Builder::new(File::create(&path).unwrap());

        let mut header = Header::new_ustar();
        header.set_path(format!("{}/", top_dir)).unwrap();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(EntryType::Directory);
        header.set_cksum();
        builder.append(&header, io::empty()).unwrap();

        for (i, (file, data)) in self.files.iter().enumerate() {
            let mut records = pax_record("path", &format!("{}/{}", top_dir, file));
            records.push_str(&pax_record("size", &data.len().to_string()));
            records.push_str(&pax_record("mtime", "1600000000.25"));

            let mut pax = Header::new_ustar();
            pax.set_path(format!("{}/PaxHeaders/{}", top_dir, i)).unwrap();
            pax.set_size(records.len() as u64);
            pax.set_mode(0o644);
            pax.set_entry_type(EntryType::XHeader);
            pax.set_cksum();
            builder.append(&pax, records.as_bytes()).unwrap();

            let mut header = Header::new_ustar();
            header.set_path(format!("{}/f{}", top_dir, i)).unwrap();
            header.set_size(0);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append(&header, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
        path
    }
}

/// One `"<len> <key>=<value>\n"` record, the length counting itself.
pub fn pax_record(key: &str, value: &str) -> String {
    let body = format!(" {}={}\n", key, value);
    let mut len = body.len() + 1;
    while len.to_string().len() + body.len() != len {
        len = len.to_string().len() + body.len();
    }
    format!("{}{}", len, body)
}
