//! Roster files: a small fixed gallery of labelled signatures.
//!
//! Layout (little-endian):
//!
//! ```text
//! "FGRS" | version u8 | count u32 | count × (label_len u16 | label utf-8 | payload_len u32 | payload)
//! ```
//!
//! Each payload is a signature in the core codec format.

use std::path::{Path, PathBuf};
use std::time::Duration;

use facegate_core::codec::{self, CodecError};
use facegate_core::enrollment::single_face;
use facegate_core::extractor::{extract_with_timeout, SignatureExtractor};
use facegate_core::{EnrollmentError, GalleryEntry, IdentityId, Signature, SignatureId};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"FGRS";
const VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed roster: {0}")]
    Malformed(String),
    #[error("entry {index}: {source}")]
    Signature {
        index: usize,
        #[source]
        source: CodecError,
    },
    #[error("label too long ({0} bytes)")]
    LabelTooLong(usize),
    #[error("no images found in {}", .0.display())]
    NoImages(PathBuf),
    #[error("{}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: EnrollmentError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub label: String,
    pub signature: Signature,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Gallery view for the matcher. An entry's position is its identity.
    pub fn gallery(&self) -> Vec<GalleryEntry> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| GalleryEntry {
                identity: IdentityId(i as i64),
                signature_id: SignatureId(i as i64),
                signature: entry.signature.clone(),
            })
            .collect()
    }

    pub fn label(&self, identity: IdentityId) -> Option<&str> {
        usize::try_from(identity.0)
            .ok()
            .and_then(|i| self.entries.get(i))
            .map(|e| e.label.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RosterError> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            let label = entry.label.as_bytes();
            let label_len =
                u16::try_from(label.len()).map_err(|_| RosterError::LabelTooLong(label.len()))?;
            let payload = codec::encode(&entry.signature);
            out.extend_from_slice(&label_len.to_le_bytes());
            out.extend_from_slice(label);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RosterError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(RosterError::Malformed("bad magic".into()));
        }
        let version = reader.take(1)?[0];
        if version != VERSION {
            return Err(RosterError::Malformed(format!("unsupported version {version}")));
        }
        let count = reader.u32()? as usize;

        let mut entries = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let label_len = reader.u16()? as usize;
            let label = std::str::from_utf8(reader.take(label_len)?)
                .map_err(|e| RosterError::Malformed(format!("entry {index} label: {e}")))?
                .to_string();
            let payload_len = reader.u32()? as usize;
            let signature = codec::decode(reader.take(payload_len)?)
                .map_err(|source| RosterError::Signature { index, source })?;
            entries.push(RosterEntry { label, signature });
        }
        if reader.pos != bytes.len() {
            return Err(RosterError::Malformed(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }
        Ok(Self { entries })
    }

    /// Write through a temporary sibling and rename, so readers never see a
    /// partial file.
    pub async fn save(&self, path: &Path) -> Result<(), RosterError> {
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::info!(path = %path.display(), entries = self.len(), "roster saved");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, RosterError> {
        let roster = Self::from_bytes(&tokio::fs::read(path).await?)?;
        tracing::info!(path = %path.display(), entries = roster.len(), "roster loaded");
        Ok(roster)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RosterError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| RosterError::Malformed(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, RosterError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, RosterError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Build a roster from every regular file in `dir`, labelled by file stem.
///
/// Files are visited in name order. Any image without exactly one face fails
/// the whole run, naming the file.
pub async fn encode_dir<E: SignatureExtractor>(
    extractor: &E,
    dir: &Path,
    timeout: Duration,
) -> Result<Roster, RosterError> {
    let mut paths = Vec::new();
    let mut listing = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = listing.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(RosterError::NoImages(dir.to_path_buf()));
    }

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let image = tokio::fs::read(&path).await?;
        let signature = match extract_with_timeout(extractor, &image, timeout).await {
            Ok(faces) => single_face(faces),
            Err(e) => Err(EnrollmentError::from(e)),
        }
        .map_err(|source| RosterError::Image { path: path.clone(), source })?;

        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!(label = %label, "roster entry encoded");
        entries.push(RosterEntry { label, signature });
    }

    Ok(Roster::new(entries))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facegate_core::ExtractError;
    use std::collections::HashMap;

    pub(crate) const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    /// A PNG-looking frame whose last byte selects the faces it contains.
    pub(crate) fn frame(tag: u8) -> Vec<u8> {
        let mut bytes = PNG.to_vec();
        bytes.push(tag);
        bytes
    }

    pub(crate) fn sig(values: &[f64]) -> Signature {
        Signature::new(values.to_vec()).unwrap()
    }

    /// Looks up faces by the frame's trailing tag byte.
    #[derive(Default)]
    pub(crate) struct TaggedExtractor {
        pub faces: HashMap<u8, Vec<Signature>>,
    }

    impl SignatureExtractor for TaggedExtractor {
        async fn extract(&self, image: &[u8]) -> Result<Vec<Signature>, ExtractError> {
            let tag = image.last().copied().unwrap_or_default();
            Ok(self.faces.get(&tag).cloned().unwrap_or_default())
        }
    }

    fn roster() -> Roster {
        Roster::new(vec![
            RosterEntry { label: "amara".into(), signature: sig(&[0.1, -0.2, 0.3]) },
            RosterEntry { label: "bo".into(), signature: sig(&[1.5, 0.0, -0.0]) },
        ])
    }

    #[test]
    fn test_bytes_round_trip() {
        let roster = roster();
        assert_eq!(Roster::from_bytes(&roster.to_bytes().unwrap()).unwrap(), roster);
    }

    #[test]
    fn test_empty_roster_round_trip() {
        let bytes = Roster::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), 9);
        assert!(Roster::from_bytes(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = roster().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(Roster::from_bytes(&bytes), Err(RosterError::Malformed(_))));

        let mut bytes = roster().to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(Roster::from_bytes(&bytes), Err(RosterError::Malformed(_))));
    }

    #[test]
    fn test_rejects_truncation_and_trailing_bytes() {
        let bytes = roster().to_bytes().unwrap();
        for cut in [3, 8, 12, bytes.len() - 1] {
            assert!(
                matches!(Roster::from_bytes(&bytes[..cut]), Err(RosterError::Malformed(_))),
                "cut at {cut}"
            );
        }
        let mut long = bytes.clone();
        long.push(0);
        assert!(matches!(Roster::from_bytes(&long), Err(RosterError::Malformed(_))));
    }

    #[test]
    fn test_corrupt_payload_names_entry() {
        let mut bytes = roster().to_bytes().unwrap();
        // Second entry's payload magic: header(9) + entry0 + label_len(2) + "bo" + payload_len(4).
        let entry0 = 2 + 5 + 4 + codec::encoded_len(3);
        bytes[9 + entry0 + 2 + 2 + 4] = b'?';
        assert!(matches!(
            Roster::from_bytes(&bytes),
            Err(RosterError::Signature { index: 1, .. })
        ));
    }

    #[test]
    fn test_gallery_and_labels() {
        let roster = roster();
        let gallery = roster.gallery();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery[1].identity, IdentityId(1));
        assert_eq!(roster.label(IdentityId(1)), Some("bo"));
        assert_eq!(roster.label(IdentityId(2)), None);
        assert_eq!(roster.label(IdentityId(-1)), None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("staff.fgr");
        roster().save(&path).await.unwrap();
        assert_eq!(Roster::load(&path).await.unwrap(), roster());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_encode_dir_labels_by_stem_in_name_order() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("zoe.png"), frame(2)).unwrap();
        std::fs::write(dir.path().join("amara.png"), frame(1)).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let mut extractor = TaggedExtractor::default();
        extractor.faces.insert(1, vec![sig(&[0.0, 1.0])]);
        extractor.faces.insert(2, vec![sig(&[1.0, 0.0])]);

        let roster = encode_dir(&extractor, dir.path(), Duration::from_secs(1)).await.unwrap();
        let labels: Vec<&str> = roster.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["amara", "zoe"]);
        assert_eq!(roster.entries()[1].signature, sig(&[1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_encode_dir_requires_one_face_per_image() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("crowd.png"), frame(3)).unwrap();

        let mut extractor = TaggedExtractor::default();
        extractor.faces.insert(3, vec![sig(&[0.0]), sig(&[1.0])]);

        let err = encode_dir(&extractor, dir.path(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            RosterError::Image { ref path, source: EnrollmentError::MultipleFacesDetected { count: 2 } }
                if path.ends_with("crowd.png")
        ));

        std::fs::write(dir.path().join("crowd.png"), b"plain text").unwrap();
        let err = encode_dir(&extractor, dir.path(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RosterError::Image { source: EnrollmentError::Extraction(_), .. }));
    }

    #[tokio::test]
    async fn test_encode_empty_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = encode_dir(&TaggedExtractor::default(), dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::NoImages(_)));
    }
}
