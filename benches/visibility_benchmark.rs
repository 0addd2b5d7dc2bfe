// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use persona_contexts::models::{Profile, ProfileAttributes, ProfileContext, Visibility};
use persona_contexts::services::visibility::ProfileRecord;
use persona_contexts::services::{resolve_visible_profiles, ContextScope};

const OWNER: u64 = 1;
const MEMBER: u64 = 2;
const STRANGER: u64 = 999;

/// An owner with many profiles, cycling through every visibility, half of
/// them linked to a shared context with an override.
fn build_records(count: u64, context_id: u64) -> Vec<ProfileRecord> {
    (0..count)
        .map(|id| {
            let visibility = Visibility::ALL[(id % 4) as usize];
            let links = if id % 2 == 0 {
                vec![ProfileContext {
                    profile_id: id,
                    context_id,
                    display_name: Some(format!("Override {}", id)),
                    visibility: Visibility::ALL[((id / 2) % 4) as usize],
                }]
            } else {
                Vec::new()
            };
            ProfileRecord {
                profile: Profile {
                    id,
                    user_id: OWNER,
                    name: format!("Profile {}", id),
                    label: None,
                    display_name: Some(format!("Display {}", id)),
                    visibility,
                    attributes: ProfileAttributes::default(),
                    created_at: Utc::now(),
                    version: 1,
                },
                links,
            }
        })
        .collect()
}

fn benchmark_resolve(c: &mut Criterion) {
    let records = build_records(500, 7);
    let scope = ContextScope {
        context_id: 7,
        context_name: Some("Work".to_string()),
        members: (1..=200).collect(),
    };

    let mut group = c.benchmark_group("resolve_visible_profiles");

    group.bench_function("owner_unscoped", |b| {
        b.iter(|| resolve_visible_profiles(black_box(OWNER), OWNER, black_box(&records), None))
    });

    group.bench_function("member_scoped", |b| {
        b.iter(|| {
            resolve_visible_profiles(black_box(MEMBER), OWNER, black_box(&records), Some(&scope))
        })
    });

    group.bench_function("stranger_scoped", |b| {
        b.iter(|| {
            resolve_visible_profiles(black_box(STRANGER), OWNER, &records, Some(&scope))
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_resolve);
criterion_main!(benches);
