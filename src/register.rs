use std::{
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::api::{ApiClient, RegisterRequest};

const RESEND_COOLDOWN: Duration = Duration::from_secs(60);
const OTP_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Contact,
    Verify,
    Submit,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub instagram: String,
    pub consent: bool,
}

/// Name, email and photo-matching consent are required; phone and instagram
/// are optional.
pub fn validate_contact(form: &ContactForm) -> Result<(), String> {
    if form.name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    let email = form.email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if !is_valid_email(email) {
        return Err("Invalid email address".to_string());
    }
    if !form.consent {
        return Err("Please agree to photo matching to continue".to_string());
    }
    Ok(())
}

pub fn is_valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    local_ok && host_ok && tld_ok
}

/// Masks the local part for on-screen display. Keeps first and last
/// character, pads with at most six asterisks; very short local parts are
/// shown as-is.
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_string();
    };
    let chars: Vec<char> = local.chars().collect();
    if chars.len() <= 2 {
        return email.to_string();
    }
    let stars = "*".repeat((chars.len() - 2).min(6));
    format!(
        "{}{}{}@{}",
        chars[0],
        stars,
        chars[chars.len() - 1],
        domain
    )
}

/// Resend gate for the verification code.
pub struct Cooldown {
    ready_at: Option<Instant>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self { ready_at: None }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    fn start_at(&mut self, now: Instant) {
        self.ready_at = Some(now + RESEND_COOLDOWN);
    }

    /// Seconds left before a resend is allowed; `None` once elapsed.
    pub fn remaining_secs(&self) -> Option<u64> {
        self.remaining_secs_at(Instant::now())
    }

    fn remaining_secs_at(&self, now: Instant) -> Option<u64> {
        let ready_at = self.ready_at?;
        if now >= ready_at {
            return None;
        }
        Some((ready_at - now).as_secs().max(1))
    }
}

pub enum RegistrationOutcome {
    Completed,
    Cancelled,
}

enum BgResult {
    OtpSent(Result<(), String>),
    Verified(Result<(), String>),
    Submitted(Result<(), String>),
}

/// Multi-step registration: contact details with a consent gate, email
/// verification with a one-time code, then the submission that hands the
/// registration to the server. Network calls run on background threads and
/// report back through a channel.
pub struct Registration {
    api: Arc<ApiClient>,
    step: Step,
    pub form: ContactForm,
    otp_input: String,
    error: Option<String>,
    sending: bool,
    verifying: bool,
    submitting: bool,
    cooldown: Cooldown,
    auto_sent: bool,
    auto_submitted: bool,
    tx: mpsc::Sender<BgResult>,
    rx: mpsc::Receiver<BgResult>,
}

impl Registration {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            api,
            step: Step::Contact,
            form: ContactForm::default(),
            otp_input: String::new(),
            error: None,
            sending: false,
            verifying: false,
            submitting: false,
            cooldown: Cooldown::new(),
            auto_sent: false,
            auto_submitted: false,
            tx,
            rx,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    fn drain(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                BgResult::OtpSent(result) => self.on_otp_sent(result),
                BgResult::Verified(result) => self.on_verified(result),
                BgResult::Submitted(result) => self.on_submitted(result),
            }
        }
    }

    fn on_otp_sent(&mut self, result: Result<(), String>) {
        self.sending = false;
        match result {
            Ok(()) => {
                self.cooldown.start();
                info!("verification code sent");
            }
            Err(message) => self.error = Some(message),
        }
    }

    fn on_verified(&mut self, result: Result<(), String>) {
        self.verifying = false;
        match result {
            Ok(()) => {
                self.step = Step::Submit;
                self.error = None;
            }
            Err(message) => {
                self.error = Some(message);
                self.otp_input.clear();
            }
        }
    }

    fn on_submitted(&mut self, result: Result<(), String>) {
        self.submitting = false;
        match result {
            Ok(()) => {
                self.step = Step::Done;
                self.error = None;
                info!("registration submitted");
            }
            Err(message) => self.error = Some(message),
        }
    }

    fn send_otp(&mut self, ctx: &egui::Context) {
        if self.sending || self.cooldown.remaining_secs().is_some() {
            return;
        }
        self.sending = true;
        self.error = None;
        let api = Arc::clone(&self.api);
        let email = self.form.email.trim().to_string();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = api.send_otp(&email, "email_verification").map(|_| ()).map_err(|e| {
                warn!(error = %e, "sending verification code failed");
                e.to_string()
            });
            let _ = tx.send(BgResult::OtpSent(result));
            ctx2.request_repaint();
        });
    }

    fn verify_otp(&mut self, ctx: &egui::Context) {
        if self.verifying || self.otp_input.len() != OTP_LEN {
            return;
        }
        self.verifying = true;
        self.error = None;
        let api = Arc::clone(&self.api);
        let email = self.form.email.trim().to_string();
        let code = self.otp_input.clone();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = api
                .verify_otp(&email, &code, "email_verification")
                .map(|_| ())
                .map_err(|e| e.to_string());
            let _ = tx.send(BgResult::Verified(result));
            ctx2.request_repaint();
        });
    }

    fn submit(&mut self, ctx: &egui::Context) {
        if self.submitting {
            return;
        }
        self.submitting = true;
        self.error = None;
        let api = Arc::clone(&self.api);
        let request = self.register_request();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = api.register(&request).map(|_| ()).map_err(|e| {
                warn!(error = %e, "registration submit failed");
                e.to_string()
            });
            let _ = tx.send(BgResult::Submitted(result));
            ctx2.request_repaint();
        });
    }

    fn register_request(&self) -> RegisterRequest {
        let optional = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        RegisterRequest {
            name: self.form.name.trim().to_string(),
            email: self.form.email.trim().to_string(),
            phone: optional(&self.form.phone),
            instagram: optional(&self.form.instagram),
            service_consent: self.form.consent,
        }
    }

    pub fn show(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) -> Option<RegistrationOutcome> {
        self.drain();
        let mut outcome = None;

        ui.vertical_centered(|ui| {
            ui.set_max_width(420.0);
            ui.add_space(24.0);
            match self.step {
                Step::Contact => self.show_contact(ui, &mut outcome),
                Step::Verify => self.show_verify(ui, ctx),
                Step::Submit => self.show_submit(ui, ctx),
                Step::Done => {
                    ui.heading("You're all set");
                    ui.add_space(8.0);
                    ui.label("Your email is verified. Your photos will find you.");
                    ui.add_space(16.0);
                    if ui.button("Continue").clicked() {
                        outcome = Some(RegistrationOutcome::Completed);
                    }
                }
            }
            if let Some(error) = &self.error {
                ui.add_space(12.0);
                ui.colored_label(egui::Color32::LIGHT_RED, error);
            }
        });

        // Auto-send once when the verify step is first shown, and submit as
        // soon as verification lands.
        if self.step == Step::Verify && !self.auto_sent {
            self.auto_sent = true;
            self.send_otp(ctx);
        }
        if self.step == Step::Submit && !self.auto_submitted {
            self.auto_submitted = true;
            self.submit(ctx);
        }
        if self.step == Step::Verify && self.cooldown.remaining_secs().is_some() {
            ctx.request_repaint_after(Duration::from_secs(1));
        }
        outcome
    }

    fn show_contact(&mut self, ui: &mut egui::Ui, outcome: &mut Option<RegistrationOutcome>) {
        ui.heading("Get your photos");
        ui.add_space(4.0);
        ui.label("Just your name and email, and your event moments find you.");
        ui.add_space(16.0);

        let field = |ui: &mut egui::Ui, label: &str, value: &mut String, hint: &str| {
            ui.label(label);
            ui.add(
                egui::TextEdit::singleline(value)
                    .hint_text(hint)
                    .desired_width(f32::INFINITY),
            );
            ui.add_space(8.0);
        };
        field(ui, "Name", &mut self.form.name, "Your name");
        field(ui, "Email", &mut self.form.email, "you@example.com");
        field(ui, "Phone (optional)", &mut self.form.phone, "555-555-1234");
        field(ui, "Instagram (optional)", &mut self.form.instagram, "@handle");

        ui.checkbox(
            &mut self.form.consent,
            "I agree to photo matching to find me in event pictures. \
             My info is only used for this event.",
        );

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui.button("Back").clicked() {
                *outcome = Some(RegistrationOutcome::Cancelled);
            }
            if ui.button("Continue").clicked() {
                match validate_contact(&self.form) {
                    Ok(()) => {
                        self.error = None;
                        self.step = Step::Verify;
                    }
                    Err(message) => self.error = Some(message),
                }
            }
        });
    }

    fn show_submit(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.heading("Finishing up");
        ui.add_space(8.0);
        if self.submitting || !self.auto_submitted {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Creating your profile...");
            });
        } else if ui.button("Try again").clicked() {
            self.submit(ctx);
        }
    }

    fn show_verify(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.heading("Verify your email");
        ui.add_space(4.0);
        ui.label(format!(
            "Enter the {OTP_LEN}-digit code sent to {}",
            mask_email(self.form.email.trim())
        ));
        ui.add_space(16.0);

        let edit = ui.add_enabled(
            !self.verifying,
            egui::TextEdit::singleline(&mut self.otp_input)
                .hint_text("0000")
                .char_limit(OTP_LEN)
                .desired_width(120.0)
                .font(egui::TextStyle::Heading),
        );
        self.otp_input.retain(|c| c.is_ascii_digit());
        if edit.changed() {
            self.error = None;
        }
        if self.otp_input.len() == OTP_LEN {
            self.verify_otp(ctx);
        }
        if self.verifying {
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Verifying...");
            });
        }

        ui.add_space(16.0);
        match self.cooldown.remaining_secs() {
            Some(secs) => {
                ui.weak(format!("Resend code in {secs}s"));
            }
            None => {
                ui.horizontal(|ui| {
                    ui.weak("Didn't receive the code?");
                    let label = if self.sending { "Sending..." } else { "Resend" };
                    if ui.add_enabled(!self.sending, egui::Button::new(label)).clicked() {
                        self.send_otp(ctx);
                    }
                });
            }
        }
    }
}
