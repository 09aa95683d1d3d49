//! Checkpoint files of the four sub-networks.
//!
//! A checkpoint file is named `<epoch>-<network>.ot`, where the epoch is a
//! zero-padded field of [EPOCH_WIDTH] digits, e.g. `00000012-disc_image.ot`.
//! Files of one epoch form a group; groups are ordered by the newest
//! modification time among their files, ties broken by epoch.

use crate::common::*;

pub const EPOCH_WIDTH: usize = 8;
pub const EXTENSION: &str = "ot";

lazy_static::lazy_static! {
    static ref FILE_NAME_REGEX: Regex = Regex::new(&format!(
        r"^(\d{{{}}})-(encoder|decoder|disc_image|disc_latent)\.{}$",
        EPOCH_WIDTH, EXTENSION
    ))
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetworkKind {
    Encoder,
    Decoder,
    ImageDiscriminator,
    LatentDiscriminator,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 4] = [
        NetworkKind::Encoder,
        NetworkKind::Decoder,
        NetworkKind::ImageDiscriminator,
        NetworkKind::LatentDiscriminator,
    ];

    /// File name suffix, also used as the variable path prefix of the network.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Decoder => "decoder",
            Self::ImageDiscriminator => "disc_image",
            Self::LatentDiscriminator => "disc_latent",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.iter().cloned().find(|kind| kind.suffix() == suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointName {
    pub epoch: usize,
    pub kind: NetworkKind,
}

impl CheckpointName {
    pub fn new(epoch: usize, kind: NetworkKind) -> Fallible<Self> {
        ensure!(
            epoch.to_string().len() <= EPOCH_WIDTH,
            "epoch {} does not fit in {} digits",
            epoch,
            EPOCH_WIDTH
        );
        Ok(Self { epoch, kind })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{:0width$}-{}.{}",
            self.epoch,
            self.kind.suffix(),
            EXTENSION,
            width = EPOCH_WIDTH
        )
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = FILE_NAME_REGEX.captures(file_name)?;
        let epoch = captures[1].parse().ok()?;
        let kind = NetworkKind::from_suffix(&captures[2])?;
        Some(Self { epoch, kind })
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointFile {
    pub name: CheckpointName,
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct EpochGroup {
    pub epoch: usize,
    pub modified: SystemTime,
    pub files: Vec<CheckpointFile>,
}

impl EpochGroup {
    pub fn path_of(&self, kind: NetworkKind) -> Option<&Path> {
        self.files
            .iter()
            .find(|file| file.name.kind == kind)
            .map(|file| file.path.as_path())
    }

    pub fn is_complete(&self) -> bool {
        NetworkKind::ALL
            .iter()
            .all(|&kind| self.path_of(kind).is_some())
    }
}

/// Lists the checkpoint files in `dir`. Files with other names are ignored.
pub fn list_checkpoints<P>(dir: P) -> Fallible<Vec<CheckpointFile>>
where
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    let dir_text = dir
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 checkpoint directory {}", dir.display()))?;
    let pattern = format!("{}/*.{}", glob::Pattern::escape(dir_text), EXTENSION);

    let files = glob::glob(&pattern)?
        .map(|entry| -> Fallible<_> {
            let path = entry?;
            let name = match path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(CheckpointName::parse)
            {
                Some(name) => name,
                None => return Ok(None),
            };
            let modified = fs::metadata(&path)?.modified()?;
            Ok(Some(CheckpointFile {
                name,
                path,
                modified,
            }))
        })
        .filter_map(|result| result.transpose())
        .collect::<Fallible<Vec<_>>>()?;

    Ok(files)
}

/// Groups files by epoch, ordered from the least to the most recently written group.
pub fn group_by_epoch(files: Vec<CheckpointFile>) -> Vec<EpochGroup> {
    let mut groups = files
        .into_iter()
        .into_group_map_by(|file| file.name.epoch)
        .into_iter()
        .filter_map(|(epoch, files)| {
            let modified = files.iter().map(|file| file.modified).max()?;
            Some(EpochGroup {
                epoch,
                modified,
                files,
            })
        })
        .collect::<Vec<_>>();

    groups.sort_by_key(|group| (group.modified, group.epoch));
    groups
}

/// The most recently written epoch group in `dir`, if any.
pub fn latest_group<P>(dir: P) -> Fallible<Option<EpochGroup>>
where
    P: AsRef<Path>,
{
    let groups = group_by_epoch(list_checkpoints(dir)?);
    Ok(groups.into_iter().last())
}

/// Keeps the `keep` most recent epoch groups in `dir` and removes the rest,
/// oldest file first. Returns the removed paths.
pub fn enforce_retention<P>(dir: P, keep: usize) -> Fallible<Vec<PathBuf>>
where
    P: AsRef<Path>,
{
    let groups = group_by_epoch(list_checkpoints(dir)?);
    let num_stale = groups.len().saturating_sub(keep);

    let mut stale = groups
        .into_iter()
        .take(num_stale)
        .flat_map(|group| group.files)
        .collect::<Vec<_>>();
    stale.sort_by_key(|file| file.modified);

    stale
        .into_iter()
        .map(|file| -> Fallible<PathBuf> {
            fs::remove_file(&file.path)
                .with_context(|| format!("unable to remove {}", file.path.display()))?;
            debug!("removed checkpoint {}", file.path.display());
            Ok(file.path)
        })
        .collect()
}

pub fn save_tensors<P>(path: P, named_tensors: &[(String, Tensor)]) -> Fallible<()>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    Tensor::save_multi(named_tensors, path)
        .with_context(|| format!("unable to write checkpoint {}", path.display()))?;
    Ok(())
}

pub fn load_tensors<P>(path: P, device: Device) -> Fallible<HashMap<String, Tensor>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let named_tensors = Tensor::load_multi_with_device(path, device)
        .with_context(|| format!("unable to read checkpoint {}", path.display()))?;
    Ok(named_tensors.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::{thread, time::Duration};

    fn touch(dir: &Path, epoch: usize, kind: NetworkKind) {
        let name = CheckpointName::new(epoch, kind).unwrap();
        fs::write(dir.join(name.file_name()), b"").unwrap();
    }

    #[test]
    fn file_name_round_trip() {
        for &kind in NetworkKind::ALL.iter() {
            for &epoch in &[0, 7, 123, 99_999_999] {
                let name = CheckpointName::new(epoch, kind).unwrap();
                assert_eq!(CheckpointName::parse(&name.file_name()), Some(name));
            }
        }

        let name = CheckpointName::new(12, NetworkKind::ImageDiscriminator).unwrap();
        assert_eq!(name.file_name(), "00000012-disc_image.ot");
    }

    #[test]
    fn reject_foreign_names() {
        assert!(CheckpointName::new(100_000_000, NetworkKind::Encoder).is_err());
        assert_eq!(CheckpointName::parse("12_enc.pth"), None);
        assert_eq!(CheckpointName::parse("0000012-encoder.ot"), None);
        assert_eq!(CheckpointName::parse("00000012-encoder.ot.bak"), None);
        assert_eq!(CheckpointName::parse("00000012-generator.ot"), None);
    }

    #[test]
    fn retention_keeps_whole_epochs() {
        let dir = tempfile::tempdir().unwrap();

        for epoch in 1..=5 {
            for &kind in NetworkKind::ALL.iter() {
                touch(dir.path(), epoch, kind);
            }
            thread::sleep(Duration::from_millis(20));
        }
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        let removed = enforce_retention(dir.path(), 3).unwrap();
        assert_eq!(removed.len(), 8);

        let groups = group_by_epoch(list_checkpoints(dir.path()).unwrap());
        let epochs = groups.iter().map(|group| group.epoch).collect::<Vec<_>>();
        assert_eq!(epochs, vec![3, 4, 5]);
        assert!(groups.iter().all(EpochGroup::is_complete));
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn latest_group_follows_write_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_group(dir.path()).unwrap().is_none());

        touch(dir.path(), 9, NetworkKind::Encoder);
        touch(dir.path(), 2, NetworkKind::Encoder);
        touch(dir.path(), 2, NetworkKind::Decoder);

        // epoch 9 was written a minute before epoch 2
        let set_mtime = |epoch, kind, secs| {
            let name = CheckpointName::new(epoch, kind).unwrap();
            filetime::set_file_mtime(
                dir.path().join(name.file_name()),
                FileTime::from_unix_time(secs, 0),
            )
            .unwrap();
        };
        set_mtime(9, NetworkKind::Encoder, 1_600_000_000);
        set_mtime(2, NetworkKind::Encoder, 1_600_000_060);
        set_mtime(2, NetworkKind::Decoder, 1_600_000_060);

        let latest = latest_group(dir.path()).unwrap().unwrap();
        assert_eq!(latest.epoch, 2);
        assert!(!latest.is_complete());
        assert!(latest.path_of(NetworkKind::Decoder).is_some());
        assert!(latest.path_of(NetworkKind::LatentDiscriminator).is_none());
    }

    #[test]
    fn equal_mtimes_fall_back_to_epoch_order() {
        let dir = tempfile::tempdir().unwrap();
        for &epoch in &[4, 11, 7] {
            touch(dir.path(), epoch, NetworkKind::Encoder);
            let name = CheckpointName::new(epoch, NetworkKind::Encoder).unwrap();
            filetime::set_file_mtime(
                dir.path().join(name.file_name()),
                FileTime::from_unix_time(1_600_000_000, 0),
            )
            .unwrap();
        }

        let latest = latest_group(dir.path()).unwrap().unwrap();
        assert_eq!(latest.epoch, 11);
    }
}
