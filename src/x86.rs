#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebugRegister {
    Dr0 = 0,
    Dr1,
    Dr2,
    Dr3,
    Dr4,
    Dr5,
    Dr6,
    Dr7,
}

impl DebugRegister {
    /// Offset of this register in the virtual `user` area, as read by `PTRACE_PEEKUSER`.
    pub fn user_offset(self) -> u64 {
        let base = memoffset::offset_of!(libc::user, u_debugreg) as u64;
        base + 8 * u64::from(self)
    }
}

impl From<DebugRegister> for u64 {
    fn from(dr: DebugRegister) -> u64 {
        dr as u64
    }
}
