//! Access-control record parsing.
//!
//! Hierarchical stores report permissions as a comma-separated list of
//! `principal_type:principal_id:permission_bits` tuples, e.g.
//!
//! ```text
//! user::rwx,group::r-x,other::r--,user:6f1c...:r--,group:91ab...:r-x
//! ```
//!
//! Only named `user` and `group` entries with read capability contribute.
//! Owner entries (empty principal id), `mask`, `other`, and malformed tuples
//! are ignored.

use crate::models::AccessControl;

pub fn parse_acl_record(record: &str) -> AccessControl {
    let mut acls = AccessControl::default();
    for entry in record.split(',') {
        let parts: Vec<&str> = entry.trim().split(':').collect();
        if parts.len() != 3 {
            continue;
        }
        let (kind, principal, bits) = (parts[0], parts[1], parts[2]);
        if principal.is_empty() || !bits.contains('r') {
            continue;
        }
        match kind {
            "user" => {
                acls.oids.insert(principal.to_string());
            }
            "group" => {
                acls.groups.insert(principal.to_string());
            }
            _ => {}
        }
    }
    acls
}
