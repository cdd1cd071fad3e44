//! Host filesystem helpers: free space, directory sizes, tree copies and
//! removable drive discovery.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::ffi::CString;
use std::fs;
use std::io;
use walkdir::WalkDir;

/// Reports free space on the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    fn free_space(&self, path: &Utf8Path) -> io::Result<u64>;
}

/// [`SpaceProbe`] backed by `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn free_space(&self, path: &Utf8Path) -> io::Result<u64> {
        let c_path = CString::new(path.as_str())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: statvfs only writes into the zeroed struct we own, and
        // c_path outlives the call.
        let stat = unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(io::Error::last_os_error());
            }
            stat
        };

        // Free blocks including the root reserve; the swap file is written as root
        Ok((stat.f_bfree as u64).saturating_mul(stat.f_frsize as u64))
    }
}

/// Total size in bytes of the regular files under `path`. Symlinks are not
/// followed and unreadable entries are skipped.
pub fn dir_size(path: &Utf8Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Recursively copy `src` into `dest`, recreating symlinks rather than
/// following them. `dest` is created if missing.
pub fn copy_tree(src: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
    tracing::debug!("Copying {} to {}", src, dest);
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel_path = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let new_path = dest.as_std_path().join(rel_path);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&new_path)?;
        } else if entry.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            if new_path.symlink_metadata().is_ok() {
                fs::remove_file(&new_path)?;
            }
            std::os::unix::fs::symlink(target, &new_path)?;
        } else {
            if let Some(parent) = new_path.parent() {
                fs::create_dir_all(parent)?;
            }
            if new_path.exists() {
                fs::remove_file(&new_path)?;
            }
            fs::copy(entry.path(), &new_path)?;
        }
    }

    Ok(())
}

/// Names of the immediate subdirectories of `path`, sorted. Symlinks are
/// excluded; a missing directory yields an empty set.
pub fn list_subdirs(path: &Utf8Path) -> io::Result<IndexSet<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(IndexSet::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        // file_type() does not follow symlinks
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    Ok(names.into_iter().collect())
}

/// Mount points under `mount_root` listed in mountinfo-format `contents`.
///
/// The mount point is the fifth whitespace-separated field; the kernel
/// escapes spaces in it as `\040`.
pub fn parse_mountinfo(contents: &str, mount_root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut mounts: Vec<Utf8PathBuf> = Vec::new();

    for line in contents.lines() {
        let Some(field) = line.split_whitespace().nth(4) else {
            continue;
        };
        let mount_point = Utf8PathBuf::from(unescape_mount_field(field));
        if mount_point.starts_with(mount_root)
            && mount_point != mount_root
            && !mounts.contains(&mount_point)
        {
            mounts.push(mount_point);
        }
    }

    mounts
}

/// Read `mountinfo` and return the drives mounted under `mount_root`.
pub fn attached_drives(mountinfo: &Utf8Path, mount_root: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let contents = fs::read_to_string(mountinfo)?;
    let drives = parse_mountinfo(&contents, mount_root);
    tracing::debug!("Found {} attached drive(s) under {}", drives.len(), mount_root);
    Ok(drives)
}

fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_statvfs_reports_space_for_tmp() {
        let dir = TempDir::new().unwrap();
        let free = StatvfsProbe.free_space(&utf8(&dir)).unwrap();
        assert!(free > 0);
    }

    #[test]
    fn test_statvfs_missing_path_is_an_error() {
        assert!(
            StatvfsProbe
                .free_space(Utf8Path::new("/definitely/not/here"))
                .is_err()
        );
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/one"), vec![0u8; 100]).unwrap();
        fs::write(root.join("a/b/two"), vec![0u8; 50]).unwrap();

        assert_eq!(dir_size(&root), 150);
        assert_eq!(dir_size(&root.join("missing")), 0);
    }

    #[test]
    fn test_copy_tree_preserves_layout_and_symlinks() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let src = root.join("src");
        fs::create_dir_all(src.join("pfx/drive_c")).unwrap();
        fs::write(src.join("pfx/drive_c/save.dat"), "data").unwrap();
        std::os::unix::fs::symlink("drive_c", src.join("pfx/dosdevices")).unwrap();

        let dest = root.join("dest");
        copy_tree(&src, &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("pfx/drive_c/save.dat")).unwrap(),
            "data"
        );
        let link = dest.join("pfx/dosdevices");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), std::path::PathBuf::from("drive_c"));
    }

    #[test]
    fn test_list_subdirs_skips_files_and_symlinks() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir(root.join("620")).unwrap();
        fs::create_dir(root.join("400")).unwrap();
        fs::write(root.join("notes.txt"), "").unwrap();
        std::os::unix::fs::symlink(root.join("620"), root.join("730")).unwrap();

        let names = list_subdirs(&root).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["400", "620"]);
        assert!(list_subdirs(&root.join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_mountinfo_filters_by_root() {
        let contents = "\
22 1 259:2 / / rw,relatime shared:1 - ext4 /dev/nvme0n1p8 rw
98 22 179:1 / /run/media/mmcblk0p1 rw,nosuid shared:50 - ext4 /dev/mmcblk0p1 rw
99 22 8:1 / /run/media/deck/My\\040Drive rw,nosuid shared:51 - ext4 /dev/sda1 rw
100 22 0:5 / /run/media rw shared:52 - tmpfs tmpfs rw
";
        let mounts = parse_mountinfo(contents, Utf8Path::new("/run/media"));
        assert_eq!(
            mounts,
            vec![
                Utf8PathBuf::from("/run/media/mmcblk0p1"),
                Utf8PathBuf::from("/run/media/deck/My Drive"),
            ]
        );
    }

    #[test]
    fn test_parse_mountinfo_ignores_short_lines() {
        assert!(parse_mountinfo("garbage\n\n", Utf8Path::new("/run/media")).is_empty());
    }
}
