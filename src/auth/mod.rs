pub mod gate;
pub mod password;

pub use self::gate::{ require_access, AccessGate };
pub use self::password::{ PasswordError, PasswordHasher };
