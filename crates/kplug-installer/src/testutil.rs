//! Archive builders shared by the unit tests.

use std::io::{Cursor, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

pub(crate) enum Entry {
    File {
        name: String,
        data: Vec<u8>,
        mode: u32,
    },
    Dir(String),
    PaxGlobal(String),
}

impl Entry {
    pub(crate) fn file(name: &str, data: &[u8], mode: u32) -> Self {
        Entry::File {
            name: name.to_string(),
            data: data.to_vec(),
            mode,
        }
    }

    pub(crate) fn dir(name: &str) -> Self {
        Entry::Dir(name.to_string())
    }

    pub(crate) fn pax_global(records: &str) -> Self {
        Entry::PaxGlobal(records.to_string())
    }
}

pub(crate) fn tar_gz(entries: &[Entry]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in entries {
        match entry {
            Entry::File { name, data, mode } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(*mode);
                builder
                    .append_data(&mut header, name, data.as_slice())
                    .unwrap();
            }
            Entry::Dir(name) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .unwrap();
            }
            Entry::PaxGlobal(records) => {
                let mut header = tar::Header::new_ustar();
                header.set_entry_type(tar::EntryType::XGlobalHeader);
                header.set_size(records.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, "pax_global_header", records.as_bytes())
                    .unwrap();
            }
        }
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// A tar.gz holding one regular file whose name bytes are written verbatim,
/// bypassing the builder's own path checks.
pub(crate) fn tar_gz_raw(name: &str, data: &[u8]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_old();
    let raw = name.as_bytes();
    header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data).unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

pub(crate) fn zip_archive(entries: &[Entry]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));

    for entry in entries {
        match entry {
            Entry::File { name, data, mode } => {
                let options = zip::write::FileOptions::default().unix_permissions(*mode);
                writer.start_file(name.as_str(), options).unwrap();
                writer.write_all(data).unwrap();
            }
            Entry::Dir(name) => {
                writer
                    .add_directory(name.as_str(), zip::write::FileOptions::default())
                    .unwrap();
            }
            Entry::PaxGlobal(_) => {}
        }
    }

    writer.finish().unwrap().into_inner()
}
