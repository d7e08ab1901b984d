//! Open-time configuration for archives.

/// Options recognized by the archive factories.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Decode the IoStore directory index when present, yielding real
    /// logical paths instead of synthesized chunk names.
    pub load_directory_index: bool,
    /// Advisory ceiling on the uncompressed size `get` will
    /// materialize; larger entries fail with `FileTooLarge`.
    pub max_file_size: Option<u64>,
    /// Emit extra debug tracing for this archive.
    pub verbose: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            load_directory_index: true,
            max_file_size: None,
            verbose: false,
        }
    }
}

/// Engine lineage of an IoStore container.
///
/// The chunk-type byte is stored verbatim either way; the lineage only
/// selects which name table diagnostics use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVersion {
    /// UE 4.25–4.27 containers
    Ue4,
    /// UE 5.x containers
    Ue5,
}

impl EngineVersion {
    /// Human-readable name for a raw chunk-type byte.
    pub fn chunk_type_name(self, raw: u8) -> &'static str {
        match self {
            Self::Ue4 => match raw {
                0 => "Invalid",
                1 => "InstallManifest",
                2 => "ExportBundleData",
                3 => "BulkData",
                4 => "OptionalBulkData",
                5 => "MemoryMappedBulkData",
                6 => "LoaderGlobalMeta",
                7 => "LoaderInitialLoadMeta",
                8 => "LoaderGlobalNames",
                9 => "LoaderGlobalNameHashes",
                10 => "ContainerHeader",
                _ => "Unknown",
            },
            Self::Ue5 => match raw {
                0 => "Invalid",
                1 => "ExportBundleData",
                2 => "BulkData",
                3 => "OptionalBulkData",
                4 => "MemoryMappedBulkData",
                5 => "ScriptObjects",
                6 => "ContainerHeader",
                7 => "ExternalFile",
                8 => "ShaderCodeLibrary",
                9 => "ShaderCode",
                10 => "PackageStoreEntry",
                11 => "DerivedData",
                12 => "EditorDerivedData",
                _ => "Unknown",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = OpenOptions::default();
        assert!(options.load_directory_index);
        assert!(options.max_file_size.is_none());
        assert!(!options.verbose);
    }

    #[test]
    fn test_chunk_type_lineage_differs() {
        assert_eq!(EngineVersion::Ue4.chunk_type_name(2), "ExportBundleData");
        assert_eq!(EngineVersion::Ue5.chunk_type_name(2), "BulkData");
        assert_eq!(EngineVersion::Ue5.chunk_type_name(200), "Unknown");
    }
}
