// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use itertools::Itertools;
use sdx_types::Route;

/// Local preference assumed for routes that do not carry one.
pub const DEFAULT_LOCAL_PREF: u32 = 100;

/// The bestpath algorithm chooses the single best route among the routes a
/// participant may use for one prefix. It performs route filtering in the
/// following ordered sequence of operations.
///
/// - filter the selection group to the routes with the largest local
///   preference
/// - filter the selection group to the routes with the smallest AS path
///   length
/// - filter the selection group to the routes with the smallest
///   multi-exit discriminator (MED)
///
/// The route server hands out exactly one next hop per (participant,
/// prefix), so remaining ties are broken on the lowest announcing
/// participant id, which keeps selection deterministic.
pub fn bestpath<'a, I>(candidates: I) -> Option<&'a Route>
where
    I: IntoIterator<Item = &'a Route>,
{
    candidates
        .into_iter()
        .max_set_by_key(|r| r.local_pref.unwrap_or(DEFAULT_LOCAL_PREF))
        .into_iter()
        .min_set_by_key(|r| r.as_path.len())
        .into_iter()
        .min_set_by_key(|r| r.med.unwrap_or(0))
        .into_iter()
        .min_by_key(|r| r.participant)
}
