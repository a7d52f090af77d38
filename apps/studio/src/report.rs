use client_core::{AppController, DenyReason, SearchPage, SendOutcome, Session};
use shared::domain::{ChatRole, UserProfile};

pub fn print_profile(profile: &UserProfile) {
    println!("user:          {}", profile.user_id);
    if let Some(email) = &profile.email {
        println!("email:         {email}");
    }
    println!("credits:       {}", profile.credits);
    println!("referral code: {}", profile.referral_code);
    if let Some(referrer) = &profile.referred_by {
        println!("referred by:   {referrer}");
    }
}

pub fn print_status(session: &Session, guest_left: u32, pending_referral: Option<&str>) {
    match (session.user(), session.profile()) {
        (Some(_), Some(profile)) => print_profile(profile),
        (Some(user), None) => {
            println!("user:          {} (profile not synced)", user.user_id);
        }
        (None, _) => println!("guest: {guest_left} free generation(s) left"),
    }
    if let Some(code) = pending_referral {
        println!("pending referral code: {code}");
    }
}

pub fn deny_notice(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::GuestLimitReached => {
            "You've used your free generations. Sign in to keep creating."
        }
        DenyReason::InsufficientCredits => {
            "Out of credits. Share your referral code to earn more."
        }
    }
}

pub fn print_outcome(controller: &AppController, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Generated { .. } | SendOutcome::Failed(_) => {
            let state = controller.state();
            if state.needs_reauth {
                eprintln!("{}", state.error.as_deref().unwrap_or_default());
                return;
            }
            if let Some(last) = state
                .messages
                .last()
                .filter(|message| message.role == ChatRole::Model)
            {
                if last.is_error {
                    eprintln!("model> {}", last.text);
                } else {
                    println!("model> {}", last.text);
                }
            }
        }
        SendOutcome::Denied(reason) => eprintln!("{}", deny_notice(*reason)),
        SendOutcome::Ignored => {}
    }
}

pub fn print_search(page: &SearchPage) {
    if page.videos.is_empty() {
        println!("no videos found");
    }
    for video in &page.videos {
        println!(
            "https://www.youtube.com/watch?v={}  {}  ({}, {})",
            video.id, video.title, video.views, video.published
        );
    }
    if let Some(token) = &page.next_page_token {
        println!("more results: --page-token {token}");
    }
}
