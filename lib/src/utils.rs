//! Small formatting helpers for the operation logs.

/// Render POSIX open flags as a comma-separated list.
pub(crate) fn open_flags_to_string(flags: i32) -> String {
    let mut parts = vec![match flags & libc::O_ACCMODE {
        libc::O_RDONLY => "rdonly",
        libc::O_WRONLY => "wronly",
        libc::O_RDWR => "rdwr",
        _ => "access?",
    }];
    const FLAGS: &[(i32, &str)] = &[
        (libc::O_CREAT, "creat"),
        (libc::O_EXCL, "excl"),
        (libc::O_TRUNC, "trunc"),
        (libc::O_APPEND, "append"),
        (libc::O_NONBLOCK, "nonblock"),
        (libc::O_DSYNC, "dsync"),
        (libc::O_DIRECT, "direct"),
        (libc::O_NOFOLLOW, "nofollow"),
        (libc::O_NOATIME, "noatime"),
        (libc::O_CLOEXEC, "cloexec"),
    ];
    for (bit, name) in FLAGS {
        if flags & bit != 0 {
            parts.push(name);
        }
    }
    parts.join(",")
}

/// Render permission bits in `rwxr-xr-x` form.
pub(crate) fn mode_to_string(mode: u32) -> String {
    const BITS: &[(u32, char)] = &[
        (libc::S_IRUSR, 'r'),
        (libc::S_IWUSR, 'w'),
        (libc::S_IXUSR, 'x'),
        (libc::S_IRGRP, 'r'),
        (libc::S_IWGRP, 'w'),
        (libc::S_IXGRP, 'x'),
        (libc::S_IROTH, 'r'),
        (libc::S_IWOTH, 'w'),
        (libc::S_IXOTH, 'x'),
    ];
    BITS.iter()
        .map(|(bit, ch)| if mode & bit != 0 { *ch } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_render() {
        assert_eq!(open_flags_to_string(libc::O_RDONLY), "rdonly");
        assert_eq!(
            open_flags_to_string(libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC),
            "wronly,creat,trunc"
        );
    }

    #[test]
    fn modes_render() {
        assert_eq!(mode_to_string(0o644), "rw-r--r--");
        assert_eq!(mode_to_string(0o755), "rwxr-xr-x");
        assert_eq!(mode_to_string(0), "---------");
    }
}
