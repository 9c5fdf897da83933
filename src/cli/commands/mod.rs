pub mod backup;
pub mod restore;
pub mod sync;

use crate::error::VaultError;

pub fn exit_for_error(err: &VaultError) -> ! {
    println!("{}", err);
    std::process::exit(2);
}
