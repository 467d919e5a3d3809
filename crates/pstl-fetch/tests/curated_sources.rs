//! Golden checks over the built-in curated listings: every record must come
//! out of annotation fully populated and stable.

use pstl_fetch::{
    merx_sample_listings, program_announcement_listings, CuratedFetcher, Fetcher,
};

#[tokio::test]
async fn program_announcements_fully_annotated() {
    let fetcher = CuratedFetcher::new("program-announcements", program_announcement_listings());
    let leads = fetcher.fetch().await.expect("curated fetch never fails");
    assert_eq!(leads.len(), 5);
    for lead in &leads {
        assert!(!lead.organization.is_empty());
        assert!(!lead.title.is_empty());
        assert!(!lead.description.is_empty());
        assert!(lead.source_url.starts_with("https://"));
        assert!(lead.budget.max.is_some(), "{}: budget must parse", lead.title);
        assert!(lead.deadline.as_iso().is_some());
        assert!(lead.insights.win_probability <= 100);
        assert!(!lead.insights.recommended_actions.is_empty());
        assert!(!lead.insights.key_requirements.is_empty());
    }
}

#[tokio::test]
async fn merx_listings_carry_contacts_and_near_deadlines() {
    let fetcher = CuratedFetcher::new("merx", merx_sample_listings());
    let leads = fetcher.fetch().await.unwrap();
    assert_eq!(leads.len(), 2);
    let today = chrono::Utc::now().date_naive();
    for lead in &leads {
        assert!(lead.contact.is_some());
        let days = lead
            .deadline
            .days_until(today)
            .expect("curated deadlines are always dated");
        assert!((0..=30).contains(&days));
        assert_eq!(lead.tier, pstl_core::Tier::Urgent);
    }
}

#[tokio::test]
async fn curated_ids_survive_a_refresh() {
    let fetcher = CuratedFetcher::new("merx", merx_sample_listings());
    let first = fetcher.fetch().await.unwrap();
    let second = fetcher.fetch().await.unwrap();
    let first_ids: Vec<_> = first.iter().map(|l| l.id).collect();
    let second_ids: Vec<_> = second.iter().map(|l| l.id).collect();
    assert_eq!(first_ids, second_ids);
}
