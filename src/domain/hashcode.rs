//! Transformation between complete and hashcode ASiC-E containers.
//!
//! A complete container carries the data files themselves; the hashcode
//! form replaces them with two XML manifests listing each file's name,
//! digest, and size, so the signing service never sees the file contents.

use crate::domain::datafile::DataFile;
use crate::infra::error::{SigaError, SigaResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Name of the mandatory first entry of an ASiC-E container.
pub const MIMETYPE_NAME: &str = "mimetype";
/// Contents of the mimetype entry.
pub const ASICE_MIMETYPE: &str = "application/vnd.etsi.asic-e+zip";

const HASHCODES_SHA256: &str = "META-INF/hashcodes-sha256.xml";
const HASHCODES_SHA512: &str = "META-INF/hashcodes-sha512.xml";

/// The hashcodes manifest: one `<file-entry>` per data file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "hashcodes")]
struct Hashcodes {
    #[serde(rename = "file-entry", default)]
    entries: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    #[serde(rename = "@full-path")]
    full_path: String,
    #[serde(rename = "@hash")]
    hash: String,
    #[serde(rename = "@size")]
    size: u64,
}

#[derive(Clone, Copy)]
enum ManifestDigest {
    Sha256,
    Sha512,
}

impl ManifestDigest {
    fn of(self, datafile: &DataFile) -> &str {
        match self {
            ManifestDigest::Sha256 => datafile.sha256_b64(),
            ManifestDigest::Sha512 => datafile.sha512_b64(),
        }
    }
}

/// A data file lives anywhere outside `META-INF/` and is not `mimetype`.
fn is_datafile_entry(name: &str) -> bool {
    name != MIMETYPE_NAME && !name.starts_with("META-INF/")
}

/// Transform a complete signature container read from `src` into hashcode
/// form written to `dst`, returning the data files read from `src`.
pub fn to_hashcode<R, W>(dst: W, src: R) -> SigaResult<Vec<DataFile>>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut archive =
        ZipArchive::new(src).map_err(|e| SigaError::BadContainer(format!("open zip: {e}")))?;
    let mut writer = ZipWriter::new(dst);

    // Copy entries from src, collecting data files and dropping them from
    // the output.
    let mut datafiles = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SigaError::BadContainer(format!("read zip entry: {e}")))?;
        let name = entry.name().to_string();

        if name == HASHCODES_SHA256 || name == HASHCODES_SHA512 {
            return Err(SigaError::BadContainer(format!(
                "hashcode {name} in complete container"
            )));
        }

        if is_datafile_entry(&name) {
            datafiles.push(DataFile::new(name, &mut entry)?);
            continue; // Do not copy to output.
        }

        let modified = entry.last_modified();
        copy_entry(&mut writer, &mut entry, &name, modified)?;
    }

    write_hashcodes(&mut writer, HASHCODES_SHA256, &datafiles, ManifestDigest::Sha256)?;
    write_hashcodes(&mut writer, HASHCODES_SHA512, &datafiles, ManifestDigest::Sha512)?;

    writer
        .finish()
        .map_err(|e| SigaError::BadContainer(format!("close zip: {e}")))?;
    Ok(datafiles)
}

/// Transform a hashcode container read from `src` into a complete
/// container written to `dst`. The data files signed in the hashcode
/// container must match `datafiles` exactly.
pub fn from_hashcode<R, W>(dst: W, src: R, datafiles: &[DataFile]) -> SigaResult<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut archive =
        ZipArchive::new(src).map_err(|e| SigaError::BadContainer(format!("open zip: {e}")))?;
    let mut writer = ZipWriter::new(dst);

    // Copy entries from src, validating and dropping the two manifests.
    let mut seen_sha256 = false;
    let mut seen_sha512 = false;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SigaError::BadContainer(format!("read zip entry: {e}")))?;
        let name = entry.name().to_string();

        if is_datafile_entry(&name) {
            return Err(SigaError::BadContainer(format!(
                "datafile {name} in hashcode container"
            )));
        }

        match name.as_str() {
            HASHCODES_SHA256 => {
                check_hashcodes(&mut entry, &name, datafiles, ManifestDigest::Sha256)?;
                seen_sha256 = true;
                continue; // Do not copy to output.
            }
            HASHCODES_SHA512 => {
                check_hashcodes(&mut entry, &name, datafiles, ManifestDigest::Sha512)?;
                seen_sha512 = true;
                continue; // Do not copy to output.
            }
            _ => {
                let modified = entry.last_modified();
                copy_entry(&mut writer, &mut entry, &name, modified)?;
            }
        }
    }
    if !seen_sha256 {
        return Err(SigaError::BadContainer("missing SHA-256 hashcodes".into()));
    }
    if !seen_sha512 {
        return Err(SigaError::BadContainer("missing SHA-512 hashcodes".into()));
    }

    // Write the data files back into the archive.
    for datafile in datafiles {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(now_datetime());
        writer
            .start_file(datafile.name(), options)
            .map_err(|e| SigaError::BadContainer(format!("create {}: {e}", datafile.name())))?;
        writer
            .write_all(datafile.data())
            .map_err(|e| SigaError::Internal(format!("write {}: {e}", datafile.name())))?;
    }

    writer
        .finish()
        .map_err(|e| SigaError::BadContainer(format!("close zip: {e}")))?;
    Ok(())
}

/// Copy one entry to the output. Everything except `mimetype` is written
/// Deflate-compressed; `mimetype` stays Stored per the ASiC-E profile.
fn copy_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    entry: &mut impl Read,
    name: &str,
    modified: Option<DateTime>,
) -> SigaResult<()> {
    let method = if name == MIMETYPE_NAME {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let mut options = SimpleFileOptions::default().compression_method(method);
    if let Some(modified) = modified {
        options = options.last_modified_time(modified);
    }
    writer
        .start_file(name, options)
        .map_err(|e| SigaError::BadContainer(format!("create {name}: {e}")))?;
    std::io::copy(entry, writer).map_err(|e| SigaError::Internal(format!("copy {name}: {e}")))?;
    Ok(())
}

fn write_hashcodes<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    datafiles: &[DataFile],
    digest: ManifestDigest,
) -> SigaResult<()> {
    let manifest = Hashcodes {
        entries: datafiles
            .iter()
            .map(|datafile| FileEntry {
                full_path: datafile.name().to_string(),
                hash: digest.of(datafile).to_string(),
                size: datafile.size(),
            })
            .collect(),
    };
    let xml = quick_xml::se::to_string(&manifest)
        .map_err(|e| SigaError::Internal(format!("encode {name}: {e}")))?;

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(now_datetime());
    writer
        .start_file(name, options)
        .map_err(|e| SigaError::BadContainer(format!("create {name}: {e}")))?;
    writer
        .write_all(xml.as_bytes())
        .map_err(|e| SigaError::Internal(format!("write {name}: {e}")))?;
    Ok(())
}

fn check_hashcodes(
    entry: &mut impl Read,
    manifest_name: &str,
    datafiles: &[DataFile],
    digest: ManifestDigest,
) -> SigaResult<()> {
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| SigaError::BadContainer(format!("read {manifest_name}: {e}")))?;
    let parsed: Hashcodes = quick_xml::de::from_str(&xml)
        .map_err(|e| SigaError::Protocol(format!("parse {manifest_name}: {e}")))?;

    let mut index: HashMap<&str, &DataFile> =
        datafiles.iter().map(|d| (d.name(), d)).collect();
    for entry in &parsed.entries {
        let datafile = index.remove(entry.full_path.as_str()).ok_or_else(|| {
            SigaError::BadContainer(format!("unknown {} in {manifest_name}", entry.full_path))
        })?;
        let expected = digest.of(datafile);
        if entry.hash != expected {
            return Err(SigaError::BadContainer(format!(
                "mismatching {} hash in {manifest_name}: {} != {expected}",
                entry.full_path, entry.hash
            )));
        }
        if entry.size != datafile.size() {
            return Err(SigaError::BadContainer(format!(
                "mismatching {} size in {manifest_name}: {} != {}",
                entry.full_path,
                entry.size,
                datafile.size()
            )));
        }
    }
    if let Some(name) = index.keys().next() {
        return Err(SigaError::BadContainer(format!(
            "missing {name} from {manifest_name}"
        )));
    }
    Ok(())
}

/// Current local time as a ZIP timestamp; falls back to the ZIP epoch when
/// the clock is outside the representable range.
fn now_datetime() -> DateTime {
    use chrono::{Datelike, Local, Timelike};
    let now = Local::now();
    DateTime::from_date_and_time(
        now.year() as u16,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}
