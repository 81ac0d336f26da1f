use crate::utils::*;
use std::fs;

/// Where evicted processes' footprints go.
///
/// Entries live in a `kernemu-swap` subdirectory of the directory the
/// store is opened on, so nothing else in that directory is ever read
/// or removed. One plain-text `<name>.txt` per process name, holding
/// the number of bytes the process had resident when it was evicted. The existence of the
/// file *is* the existence of the entry, so at most one entry per name
/// can exist at any time.
///
/// Page-in/page-out counters are cumulative and never reset. Their
/// unit is chosen by the caller: frames under paging, one per
/// operation under the flat allocator.
pub struct BackingStore {
    dir:        PathBuf,
    pages_in:   AtomicU64,
    pages_out:  AtomicU64,
}

const ENTRY_DIR: &str = "kernemu-swap";
const ENTRY_EXT: &str = "txt";

impl BackingStore {
    /// Opens (creating if needed) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let dir = dir.join(ENTRY_DIR);
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            pages_in:   AtomicU64::new(0),
            pages_out:  AtomicU64::new(0),
        })
    }

    /// The directory entries are kept in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{ENTRY_EXT}"))
    }

    /// Persists `name → size`. Storing a name that is already present is
    /// a caller error and leaves the existing entry untouched.
    pub fn store(&self, name: &str, size: Bytes, units: u64) -> Result<(), StoreError> {
        let path = self.entry(name);
        if path.exists() {
            return Err(StoreError::AlreadyStored(String::from(name)));
        }
        fs::write(&path, size.to_string())?;
        self.pages_out.fetch_add(units, Ordering::Relaxed);
        debug!("Paged out {name} ({size} bytes, {units} units)");

        Ok(())
    }

    /// Looks at an entry without consuming it.
    pub fn footprint(&self, name: &str) -> Option<Bytes> {
        match fs::read_to_string(self.entry(name)) {
            Ok(txt) => { txt.trim().parse::<Bytes>().ok() },
            Err(_)  => { None }
        }
    }

    /// Looks up and removes an entry. A miss yields `0`, telling the
    /// caller to fall back to the process's static requirement. An
    /// entry that does not parse is dropped and counts as a miss.
    pub fn retrieve(&self, name: &str, units: u64) -> Bytes {
        let path = self.entry(name);
        if !path.exists() {
            return 0;
        }
        let size = self.footprint(name);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Could not drop backing store entry of {name}: {e}");
        }
        match size {
            Some(size)  => {
                self.pages_in.fetch_add(units, Ordering::Relaxed);
                debug!("Paged in {name} ({size} bytes, {units} units)");
                size
            },
            None        => {
                warn!("Dropped unreadable backing store entry of {name}");
                0
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).exists()
    }

    /// Names currently stored, sorted.
    pub fn entries(&self) -> Vec<String> {
        let mut res = vec![];
        if let Ok(rd) = fs::read_dir(&self.dir) {
            for de in rd.flatten() {
                let p = de.path();
                if p.extension().is_some_and(|e| e == ENTRY_EXT) {
                    if let Some(stem) = p.file_stem() {
                        res.push(stem.to_string_lossy().into_owned());
                    }
                }
            }
        }
        res.sort_unstable();

        res
    }

    /// Drops entries left over by an earlier run.
    pub fn clear(&self) -> Result<(), StoreError> {
        for name in self.entries() {
            fs::remove_file(self.entry(&name))?;
        }

        Ok(())
    }

    pub fn pages_in(&self) -> u64 {
        self.pages_in.load(Ordering::Relaxed)
    }

    pub fn pages_out(&self) -> u64 {
        self.pages_out.load(Ordering::Relaxed)
    }
}
