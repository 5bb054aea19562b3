//! Special build-time detection for ARM targets.
//!
//! We need to determine some properties of the target for inline assembly and
//! for the trampoline encoder that are not otherwise easily available:
//! - Does the target use the ARM or Thumb instruction set by default?
//! - Does a Thumb target have Thumb-2 instructions?
//! - Does the target use R7 or R11 for its frame pointer?

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-check-cfg=cfg(fp_is_r7, is_thumb, has_thumb2)");

    // We only care about ARM.
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    if arch != "arm" {
        return;
    }

    // Probe the frame pointer register: whichever one can't be named as an
    // asm! operand is the one LLVM reserves.
    let cfg = autocfg::new();
    let r7_available = cfg.probe_expression("unsafe { core::arch::asm!(\"\", out(\"r7\") _) }");
    let r11_available = cfg.probe_expression("unsafe { core::arch::asm!(\"\", out(\"r11\") _) }");

    match (r7_available, r11_available) {
        (true, false) => {}
        (false, true) => autocfg::emit("fp_is_r7"),
        _ => panic!("could not determine whether frame pointer is r7 or r11"),
    }

    let target = env::var("TARGET").unwrap();
    let target_features = env::var("CARGO_CFG_TARGET_FEATURE").unwrap_or_default();
    let features: Vec<&str> = target_features.split(',').collect();

    // The most reliable way is to check for the thumb-mode feature in
    // CARGO_CFG_TARGET_FEATURE but this is only available on nightly. As a
    // fallback we just check if the target name starts with "thumb".
    let is_thumb = features.contains(&"thumb-mode") || target.starts_with("thumb");
    if is_thumb {
        autocfg::emit("is_thumb");
    }

    // Cortex-M0/M0+/M1 (v6-M) and v8-M baseline only have Thumb-1.
    let thumb1_only = target.starts_with("thumbv6m") || target.starts_with("thumbv8m.base");
    if is_thumb && (features.contains(&"thumb2") || !thumb1_only) {
        autocfg::emit("has_thumb2");
    }
}
