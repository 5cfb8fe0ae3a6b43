use std::fmt;

/// A metadata token naming a type, method, field, signature or user string.
///
/// The code generator never resolves tokens; it only copies them into instruction
/// operands. The high byte selects the metadata table, the low 24 bits the row.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table
    pub const TABLE_TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TABLE_TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const TABLE_FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const TABLE_METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table
    pub const TABLE_MEMBER_REF: u8 = 0x0A;
    /// `TypeSpec` table
    pub const TABLE_TYPE_SPEC: u8 = 0x1B;
    /// `MethodSpec` table
    pub const TABLE_METHOD_SPEC: u8 = 0x2B;
    /// User string heap
    pub const TABLE_USER_STRING: u8 = 0x70;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
