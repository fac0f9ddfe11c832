//! Free-space probing through `sysinfo`.

use std::io;
use std::path::Path;

use sysinfo::Disks;

use crate::domain::ports::SpaceProbe;

/// Reports the available space of the filesystem mounted closest to a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn usable_space(&self, path: &Path) -> io::Result<u64> {
        let path = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(sysinfo::Disk::available_space)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted filesystem contains {}", path.display()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_is_an_error() {
        let probe = SystemSpaceProbe;
        let err = probe
            .usable_space(Path::new("/definitely/not/a/real/pixfetch/path"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_existing_path_resolves_or_reports_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        match SystemSpaceProbe.usable_space(dir.path()) {
            Ok(_) => {}
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
        }
    }
}
