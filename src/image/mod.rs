/*
   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

      http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

pub mod loader;
pub mod oemvars;

use zerocopy::{FromBytes, LayoutVerified};

use crate::error::CoreError;

/// Boot image magic string size.
pub const BOOT_MAGIC_SIZE: usize = 8;
/// Boot image magic string.
pub const BOOT_MAGIC: [u8; BOOT_MAGIC_SIZE] = *b"ANDROID!";
/// Maximum product name size.
pub const BOOT_NAME_SIZE: usize = 16;
/// Maximum size of the kernel command line in the header.
pub const BOOT_ARGS_SIZE: usize = 512;
/// Maximum size of the supplemental command line.
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;

/// The classic boot image header. Kernel, ramdisk and the optional
/// second-stage blob follow it, each padded out to page_size.
#[repr(C, packed)]
#[derive(FromBytes, Copy, Clone)]
pub struct BootImgHdr {
    pub magic: [u8; BOOT_MAGIC_SIZE],
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub header_version: u32,
    pub os_version: u32,
    pub name: [u8; BOOT_NAME_SIZE],
    pub cmdline: [u8; BOOT_ARGS_SIZE],
    pub id: [u32; 8],
    pub extra_cmdline: [u8; BOOT_EXTRA_ARGS_SIZE],
}

fn trimmed(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    &field[..end]
}

fn pages(size: u32, page_size: u32) -> u64 {
    (u64::from(size) + u64::from(page_size) - 1) / u64::from(page_size)
}

/// A loaded payload, parsed just far enough for the decisions this core
/// has to make: the magic, the command line and the second-stage blob.
pub struct BootImage<'a> {
    hdr: BootImgHdr,
    data: &'a [u8],
}

impl<'a> BootImage<'a> {
    /// Parse the header. Anything without the magic is not a boot image,
    /// no matter how it verified.
    pub fn parse(data: &'a [u8]) -> Result<BootImage<'a>, CoreError> {
        let (view, _rest) = LayoutVerified::<_, BootImgHdr>::new_from_prefix(data)
            .ok_or(CoreError::NotFound)?;
        let hdr: BootImgHdr = *view;
        if hdr.magic != BOOT_MAGIC {
            return Err(CoreError::NotFound);
        }
        Ok(BootImage { hdr, data })
    }

    /// The command line baked into the header, including the
    /// supplemental area.
    pub fn cmdline(&self) -> String {
        let main = String::from_utf8_lossy(trimmed(&self.hdr.cmdline)).into_owned();
        let extra = String::from_utf8_lossy(trimmed(&self.hdr.extra_cmdline));
        if extra.is_empty() {
            main
        } else if main.is_empty() {
            extra.into_owned()
        } else {
            format!("{} {}", main, extra)
        }
    }

    pub fn has_second_stage(&self) -> bool {
        self.hdr.second_size > 0
    }

    /// The second-stage blob, when present and within bounds.
    pub fn second_stage(&self) -> Option<&'a [u8]> {
        let second_size = self.hdr.second_size;
        let page_size = self.hdr.page_size;
        if second_size == 0 || page_size == 0 {
            return None;
        }
        let offset = u64::from(page_size)
            * (1 + pages(self.hdr.kernel_size, page_size) + pages(self.hdr.ramdisk_size, page_size));
        let end = offset.checked_add(u64::from(second_size))?;
        self.data.get(offset as usize..end as usize)
    }

    pub fn kernel_size(&self) -> u32 {
        self.hdr.kernel_size
    }

    pub fn page_size(&self) -> u32 {
        self.hdr.page_size
    }
}
