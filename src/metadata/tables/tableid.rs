//! Identifiers for the metadata tables of the `#~` stream.

use strum::{EnumCount, EnumIter};

/// Identifies one metadata table kind.
///
/// Discriminants are the table numbers from the binary format; a table's
/// number is also the top byte of every token referencing it. The
/// `FieldPtr`/`MethodPtr`/`ParamPtr`/`EventPtr`/`PropertyPtr` indirection
/// tables only occur in unoptimized images but are part of the supported
/// schema.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, PartialOrd, Ord, EnumIter, EnumCount)]
#[repr(u8)]
pub enum TableId {
    /// Current module descriptor (exactly one row)
    Module = 0x00,
    /// References to types in other modules
    TypeRef = 0x01,
    /// Type definitions of this module
    TypeDef = 0x02,
    /// Field indirection table
    FieldPtr = 0x03,
    /// Field definitions
    Field = 0x04,
    /// Method indirection table
    MethodPtr = 0x05,
    /// Method definitions
    MethodDef = 0x06,
    /// Parameter indirection table
    ParamPtr = 0x07,
    /// Parameter definitions
    Param = 0x08,
    /// Interface implementations per type
    InterfaceImpl = 0x09,
    /// Member references (methods/fields by name + signature)
    MemberRef = 0x0A,
    /// Compile-time constants for fields/params/properties
    Constant = 0x0B,
    /// Custom attribute applications
    CustomAttribute = 0x0C,
    /// Marshalling descriptors
    FieldMarshal = 0x0D,
    /// Declarative security records
    DeclSecurity = 0x0E,
    /// Explicit class packing/size
    ClassLayout = 0x0F,
    /// Explicit field offsets
    FieldLayout = 0x10,
    /// Stand-alone signatures (locals, calli sites)
    StandAloneSig = 0x11,
    /// Type -> first event mapping
    EventMap = 0x12,
    /// Event indirection table
    EventPtr = 0x13,
    /// Event definitions
    Event = 0x14,
    /// Type -> first property mapping
    PropertyMap = 0x15,
    /// Property indirection table
    PropertyPtr = 0x16,
    /// Property definitions
    Property = 0x17,
    /// Getter/setter/add/remove/fire associations
    MethodSemantics = 0x18,
    /// Explicit override records
    MethodImpl = 0x19,
    /// References to other modules of this assembly
    ModuleRef = 0x1A,
    /// Type specifications (signature-encoded types)
    TypeSpec = 0x1B,
    /// P/Invoke mappings
    ImplMap = 0x1C,
    /// Initial field data locations
    FieldRva = 0x1D,
    /// Edit-and-continue log (rejected at load)
    EncLog = 0x1E,
    /// Edit-and-continue map (rejected at load)
    EncMap = 0x1F,
    /// Assembly manifest (zero or one row)
    Assembly = 0x20,
    /// Legacy processor record
    AssemblyProcessor = 0x21,
    /// Legacy OS record
    AssemblyOs = 0x22,
    /// Referenced assemblies
    AssemblyRef = 0x23,
    /// Legacy processor record for references
    AssemblyRefProcessor = 0x24,
    /// Legacy OS record for references
    AssemblyRefOs = 0x25,
    /// Files of this assembly
    File = 0x26,
    /// Types exported from other modules
    ExportedType = 0x27,
    /// Embedded/linked resources
    ManifestResource = 0x28,
    /// Nesting relationships
    NestedClass = 0x29,
    /// Generic parameter definitions
    GenericParam = 0x2A,
    /// Generic method instantiations
    MethodSpec = 0x2B,
    /// Generic parameter constraints
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Highest supported table number; valid-mask bits above the PDB range
    /// are structural errors.
    pub const MAX: u8 = TableId::GenericParamConstraint as u8;

    /// Map a raw table number to a `TableId`.
    #[must_use]
    pub fn from_number(number: u8) -> Option<TableId> {
        use strum::IntoEnumIterator;
        TableId::iter().find(|id| *id as u8 == number)
    }

    /// The token prefix of this table (table number shifted into the top
    /// byte).
    #[must_use]
    pub fn token_base(&self) -> u32 {
        u32::from(*self as u8) << 24
    }
}

/// Table numbers 0x30..=0x37 carry portable-PDB data and are recognized but
/// unsupported.
#[must_use]
pub fn is_pdb_table_number(number: u8) -> bool {
    (0x30..=0x37).contains(&number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn numbers_round_trip() {
        for id in TableId::iter() {
            assert_eq!(TableId::from_number(id as u8), Some(id));
        }
        assert_eq!(TableId::from_number(0x2D), None);
    }

    #[test]
    fn token_base_matches_number() {
        assert_eq!(TableId::MethodDef.token_base(), 0x0600_0000);
        assert_eq!(TableId::TypeSpec.token_base(), 0x1B00_0000);
    }
}
