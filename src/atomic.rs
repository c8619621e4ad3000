use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Writes `contents` to `destination` via a temp file in the same directory, so
/// readers only ever see the old file or the complete new one.
pub async fn write_atomic(destination: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = destination.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Not a valid file path: {}", destination.display()),
        )
    })?;
    tokio::fs::create_dir_all(parent).await?;
    let temp = NamedTempFile::new_in(parent)?;
    let mut file = File::from_std(temp.reopen()?);
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await?;
    temp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("record.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "second");

        // Only the destination remains, no stray temp files
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
